//! PUCCH resource determination, TS 38.213 9.2.1 and 9.2.3

use nr_config::{CfgPucch, CfgPucchResource, CfgPucchResourceSet, PucchFormat};

/// Largest UCI payload a PUCCH resource set may be configured for
pub const MAX_UCI_BITS: u16 = 1706;

/// Row of TS 38.213 Table 9.2.1-1, PUCCH resources before dedicated configuration
#[derive(Debug, Clone, Copy)]
pub struct InitialPucch {
    pub format: PucchFormat,
    pub start_symbol: u8,
    pub nr_symbols: u8,
    pub prb_offset: u16,
    pub n_cs: u8,
    pub cs: [u8; 4],
}

const fn ip(format: PucchFormat, start_symbol: u8, nr_symbols: u8, prb_offset: u16, n_cs: u8, cs: [u8; 4]) -> InitialPucch {
    InitialPucch { format, start_symbol, nr_symbols, prb_offset, n_cs, cs }
}

const INITIAL_PUCCH: [InitialPucch; 16] = [
    ip(PucchFormat::F0, 12, 2, 0, 2, [0, 3, 0, 0]),
    ip(PucchFormat::F0, 12, 2, 0, 3, [0, 4, 8, 0]),
    ip(PucchFormat::F0, 12, 2, 3, 3, [0, 4, 8, 0]),
    ip(PucchFormat::F1, 10, 4, 0, 2, [0, 6, 0, 0]),
    ip(PucchFormat::F1, 10, 4, 0, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 10, 4, 2, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 10, 4, 4, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 4, 10, 0, 2, [0, 6, 0, 0]),
    ip(PucchFormat::F1, 4, 10, 0, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 4, 10, 2, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 4, 10, 4, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 0, 14, 0, 2, [0, 6, 0, 0]),
    ip(PucchFormat::F1, 0, 14, 0, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 0, 14, 2, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 0, 14, 4, 4, [0, 3, 6, 9]),
    ip(PucchFormat::F1, 0, 14, 0, 4, [0, 3, 6, 9]),
];

pub fn initial_pucch(common_index: u8) -> InitialPucch {
    INITIAL_PUCCH[(common_index & 0xf) as usize]
}

/// r_PUCCH for the initial resource table, 0..=15
pub fn initial_resource_index(n_cce: u16, n_cce_total: u16, pri: u8) -> Option<u8> {
    if n_cce_total == 0 {
        return None;
    }
    let r = (2 * n_cce as u32) / n_cce_total as u32 + 2 * pri as u32;
    (r < 16).then_some(r as u8)
}

/// PRB allocation of initial resource `r_pucch` in a BWP of `bwp_size` PRBs:
/// (first hop PRB, second hop PRB, initial cyclic shift)
pub fn initial_prbs(row: &InitialPucch, common_index: u8, r_pucch: u8, bwp_size: u16) -> (u16, u16, u8) {
    let offset = if common_index == 15 { bwp_size / 4 } else { row.prb_offset };
    let n_cs = row.n_cs.max(1);
    if r_pucch < 8 {
        let tmp = (r_pucch / n_cs) as u16;
        (offset + tmp, bwp_size - 1 - offset - tmp, row.cs[(r_pucch % n_cs) as usize])
    } else {
        let tmp = ((r_pucch - 8) / n_cs) as u16;
        (bwp_size - 1 - offset - tmp, offset + tmp, row.cs[((r_pucch - 8) % n_cs) as usize])
    }
}

/// Resource set for `n_uci` bits: set 0 up to 2 bits, otherwise the first further set
/// whose maximum payload covers them
pub fn select_resource_set(pucch: &CfgPucch, n_uci: u16) -> Option<&CfgPucchResourceSet> {
    if n_uci <= 2 {
        return pucch.resource_sets.iter().find(|s| s.id == 0);
    }
    let mut sets: Vec<&CfgPucchResourceSet> = pucch.resource_sets.iter().filter(|s| s.id > 0).collect();
    sets.sort_by_key(|s| s.id);
    sets.into_iter().find(|s| n_uci <= s.max_payload_size.unwrap_or(MAX_UCI_BITS))
}

/// Index into a resource set of `set_len` resources. Set 0 with more than 8 resources also
/// uses the CCE of the scheduling PDCCH.
pub fn resource_index_in_set(set_id: u8, set_len: usize, pri: u8, n_cce: u16, n_cce_total: u16) -> usize {
    let pri = pri as usize;
    if set_id != 0 || set_len <= 8 || n_cce_total == 0 {
        return pri;
    }
    let (n, total) = (n_cce as usize, n_cce_total as usize);
    let rem = set_len % 8;
    if pri < rem {
        let c = set_len.div_ceil(8);
        n * c / total + pri * c
    } else {
        let f = set_len / 8;
        n * f / total + pri * f + rem
    }
}

/// Dedicated resource carrying `n_uci` bits of HARQ-ACK signalled with `pri`
pub fn harq_resource(pucch: &CfgPucch, n_uci: u16, pri: u8, n_cce: u16, n_cce_total: u16) -> Option<&CfgPucchResource> {
    let set = select_resource_set(pucch, n_uci)?;
    let idx = resource_index_in_set(set.id, set.resources.len(), pri, n_cce, n_cce_total);
    let id = set.resources.get(idx)?;
    pucch.resource(*id)
}

/// Format 0 cyclic shift m_cs for the HARQ-ACK and SR state, TS 38.213 9.2.3 and 9.2.5.1
pub fn f0_cyclic_shift(n_harq: u8, ack_payload: u64, n_sr: u8, sr_payload: u8) -> u8 {
    const ACK_1: [u8; 2] = [0, 6];
    const ACK_2: [u8; 4] = [0, 3, 9, 6];
    const ACK_1_SR: [u8; 2] = [3, 9];
    const ACK_2_SR: [u8; 4] = [1, 4, 10, 7];
    if n_sr == 0 || sr_payload == 0 {
        match n_harq {
            0 => 0,
            1 => ACK_1[(ack_payload & 1) as usize],
            _ => ACK_2[(ack_payload & 3) as usize],
        }
    } else {
        match n_harq {
            0 => 0,
            1 => ACK_1_SR[(ack_payload & 1) as usize],
            _ => ACK_2_SR[(ack_payload & 3) as usize],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_selection() {
        let cfg = CfgPucch::default();
        assert_eq!(select_resource_set(&cfg, 1).map(|s| s.id), Some(0));
        assert_eq!(select_resource_set(&cfg, 2).map(|s| s.id), Some(0));
        assert_eq!(select_resource_set(&cfg, 3).map(|s| s.id), Some(1));
        assert_eq!(select_resource_set(&cfg, 1706).map(|s| s.id), Some(1));
        assert!(select_resource_set(&cfg, 1707).is_none());
        assert_eq!(harq_resource(&cfg, 1, 1, 0, 8).map(|r| r.id), Some(1));
        assert_eq!(harq_resource(&cfg, 5, 0, 0, 8).map(|r| r.id), Some(2));
        assert!(harq_resource(&cfg, 5, 1, 0, 8).is_none());
    }

    #[test]
    fn test_large_set_zero_uses_cce() {
        // 10 resources: the first two PRI values get 2 resources each, split by CCE
        assert_eq!(resource_index_in_set(0, 10, 0, 0, 16), 0);
        assert_eq!(resource_index_in_set(0, 10, 0, 8, 16), 1);
        assert_eq!(resource_index_in_set(0, 10, 1, 8, 16), 3);
        assert_eq!(resource_index_in_set(0, 10, 2, 0, 16), 4);
        assert_eq!(resource_index_in_set(0, 10, 7, 15, 16), 9);
        assert_eq!(resource_index_in_set(1, 10, 3, 15, 16), 3);
    }

    #[test]
    fn test_initial_resource() {
        assert_eq!(initial_resource_index(0, 8, 0), Some(0));
        assert_eq!(initial_resource_index(4, 8, 3), Some(7));
        assert_eq!(initial_resource_index(7, 8, 7), Some(15));
        assert_eq!(initial_resource_index(0, 0, 0), None);

        let row = initial_pucch(0);
        assert_eq!(row.format, PucchFormat::F0);
        assert_eq!(initial_prbs(&row, 0, 1, 106), (0, 105, 3));
        assert_eq!(initial_prbs(&row, 0, 9, 106), (105, 0, 3));
    }

    #[test]
    fn test_f0_shift() {
        assert_eq!(f0_cyclic_shift(1, 0, 0, 0), 0);
        assert_eq!(f0_cyclic_shift(1, 1, 0, 0), 6);
        assert_eq!(f0_cyclic_shift(2, 0b11, 0, 0), 6);
        assert_eq!(f0_cyclic_shift(2, 0b10, 0, 0), 9);
        assert_eq!(f0_cyclic_shift(1, 1, 1, 1), 9);
        assert_eq!(f0_cyclic_shift(2, 0b01, 1, 1), 4);
        // Negative SR leaves the ACK-only mapping
        assert_eq!(f0_cyclic_shift(1, 1, 1, 0), 6);
        assert_eq!(f0_cyclic_shift(0, 0, 1, 1), 0);
    }
}
