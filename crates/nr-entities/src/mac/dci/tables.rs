//! Lookup tables and closed-form allocations from TS 38.211 and TS 38.214.

use nr_config::McsTable;

/// Target code rate x 1024 x 10, 0 for reserved entries. TS 38.214 Table 5.1.3.1-1
const MCS_TABLE_QAM64: [u16; 32] = [
    1200, 1570, 1930, 2510, 3080, 3790, 4490, 5260, 6020, 6790, 3400, 3780, 4340, 4900, 5530, 6160,
    6580, 4380, 4660, 5170, 5670, 6160, 6660, 7190, 7720, 8220, 8730, 9100, 9480, 0, 0, 0,
];
const QM_TABLE_QAM64: [u8; 32] = [
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 4, 4, 4, 4, 4, 4, 4, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 2, 4, 6,
];

/// Table 5.1.3.1-2
const MCS_TABLE_QAM256: [u16; 32] = [
    1200, 1930, 3080, 4490, 6020, 3780, 4340, 4900, 5530, 6160, 6580, 4660, 5170, 5670, 6160, 6660,
    7190, 7720, 8220, 8730, 6825, 7110, 7540, 7970, 8410, 8850, 9165, 9480, 0, 0, 0, 0,
];
const QM_TABLE_QAM256: [u8; 32] = [
    2, 2, 2, 2, 2, 4, 4, 4, 4, 4, 4, 6, 6, 6, 6, 6, 6, 6, 6, 6, 8, 8, 8, 8, 8, 8, 8, 8, 2, 4, 6, 8,
];

/// Table 5.1.3.1-3
const MCS_TABLE_QAM64_LOW_SE: [u16; 32] = [
    300, 400, 500, 640, 780, 990, 1200, 1570, 1930, 2510, 3080, 3790, 4490, 5260, 6020, 3400, 3780,
    4340, 4900, 5530, 6160, 4380, 4660, 5170, 5670, 6160, 6660, 7190, 7720, 0, 0, 0,
];
const QM_TABLE_QAM64_LOW_SE: [u8; 32] = [
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 4, 4, 4, 4, 4, 4, 6, 6, 6, 6, 6, 6, 6, 6, 2, 4, 6,
];

pub fn mcs_qm(table: McsTable, mcs: u8) -> u8 {
    let mcs = (mcs & 0x1f) as usize;
    match table {
        McsTable::Qam64 => QM_TABLE_QAM64[mcs],
        McsTable::Qam256 => QM_TABLE_QAM256[mcs],
        McsTable::Qam64LowSe => QM_TABLE_QAM64_LOW_SE[mcs],
    }
}

/// Code rate x 10240. Returns 0 for the reserved indices that only signal a modulation
/// order for a retransmission.
pub fn mcs_code_rate(table: McsTable, mcs: u8) -> u16 {
    let mcs = (mcs & 0x1f) as usize;
    match table {
        McsTable::Qam64 => MCS_TABLE_QAM64[mcs],
        McsTable::Qam256 => MCS_TABLE_QAM256[mcs],
        McsTable::Qam64LowSe => MCS_TABLE_QAM64_LOW_SE[mcs],
    }
}

/// TS 38.214 Table 5.1.3.2-1
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176, 184, 192, 208,
    224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480, 504, 528, 552, 576, 608, 640,
    672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064, 1128, 1160, 1192, 1224, 1256, 1288, 1320, 1352,
    1416, 1480, 1544, 1608, 1672, 1736, 1800, 1864, 1928, 2024, 2088, 2152, 2216, 2280, 2408, 2472, 2536,
    2600, 2664, 2728, 2792, 2856, 2976, 3104, 3240, 3368, 3496, 3624, 3752, 3824,
];

/// Everything the TBS formula needs about one shared channel allocation
#[derive(Debug, Clone, Copy)]
pub struct TbsParams {
    pub nb_rb: u16,
    pub nb_symb: u8,
    /// DM-RS REs per PRB over the whole allocation
    pub nb_re_dmrs: u32,
    /// xOverhead REs per PRB
    pub nb_rb_oh: u32,
    /// Code rate x 10240
    pub r: u16,
    pub qm: u8,
    pub layers: u8,
    /// TB scaling factor of RA-RNTI DCIs, 1.0 otherwise
    pub scaling: f64,
}

/// Transport block size in bits, TS 38.214 5.1.3.2
pub fn compute_tbs(p: &TbsParams) -> u32 {
    let nbp_re = (12 * p.nb_symb as i64 - p.nb_re_dmrs as i64 - p.nb_rb_oh as i64).max(0);
    let nb_re = nbp_re.min(156) * p.nb_rb as i64;
    let n_info = p.scaling * nb_re as f64 * (p.r as f64 / 10240.0) * p.qm as f64 * p.layers as f64;
    if n_info <= 0.0 {
        return 0;
    }

    if n_info <= 3824.0 {
        let n = ((n_info.log2().floor() as i32) - 6).max(3);
        let step = (1u32 << n) as f64;
        let np_info = (step * (n_info / step).floor()).max(24.0) as u32;
        // First table entry not below N'info
        let idx = TBS_TABLE.partition_point(|&tbs| tbs < np_info);
        return TBS_TABLE[idx.min(TBS_TABLE.len() - 1)];
    }

    let n = ((n_info - 24.0).log2().floor() as i32) - 5;
    let step = (1u64 << n) as f64;
    let np_info = (step * ((n_info - 24.0) / step).round()).max(3840.0) as u64;
    let tbs = if p.r <= 2560 {
        // R <= 1/4
        let c = (np_info + 24).div_ceil(3816);
        8 * c * (np_info + 24).div_ceil(8 * c) - 24
    } else if np_info > 8424 {
        let c = (np_info + 24).div_ceil(8424);
        8 * c * (np_info + 24).div_ceil(8 * c) - 24
    } else {
        8 * (np_info + 24).div_ceil(8) - 24
    };
    tbs as u32
}

/// One row of a time domain resource allocation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdraRow {
    /// k0 for PDSCH, k2 for PUSCH
    pub k: u8,
    pub mapping_type_b: bool,
    pub start_symbol: u8,
    pub nr_symbols: u8,
}

const fn row(k: u8, mapping_type_b: bool, start_symbol: u8, nr_symbols: u8) -> TdraRow {
    TdraRow { k, mapping_type_b, start_symbol, nr_symbols }
}

/// PDSCH default table A, normal CP, dmrs-TypeA-Position pos2. TS 38.214 Table 5.1.2.1.1-2
const PDSCH_DEFAULT_A: [TdraRow; 16] = [
    row(0, false, 2, 12),
    row(0, false, 2, 10),
    row(0, false, 2, 9),
    row(0, false, 2, 7),
    row(0, false, 2, 5),
    row(0, true, 9, 4),
    row(0, true, 4, 4),
    row(0, true, 5, 7),
    row(0, true, 5, 2),
    row(0, true, 9, 2),
    row(0, true, 12, 2),
    row(0, false, 1, 13),
    row(0, false, 1, 6),
    row(0, false, 2, 4),
    row(0, true, 4, 7),
    row(0, true, 8, 4),
];

pub fn pdsch_default_tdra(index: u8) -> Option<TdraRow> {
    PDSCH_DEFAULT_A.get(index as usize).copied()
}

/// PUSCH default table A, normal CP, as (k2 - j, mapping B, S, L). TS 38.214 Table 6.1.2.1.1-2
const PUSCH_DEFAULT_A: [TdraRow; 16] = [
    row(0, false, 0, 14),
    row(0, false, 0, 12),
    row(0, false, 0, 10),
    row(0, true, 2, 10),
    row(0, true, 4, 10),
    row(0, true, 4, 8),
    row(0, true, 4, 6),
    row(1, false, 0, 14),
    row(1, false, 0, 12),
    row(1, false, 0, 10),
    row(2, false, 0, 14),
    row(2, false, 0, 12),
    row(2, false, 0, 10),
    row(0, true, 8, 6),
    row(3, false, 0, 14),
    row(3, false, 0, 10),
];

/// The j of TS 38.214 Table 6.1.2.1.1-4
pub fn pusch_k2_j(mu: u8) -> u8 {
    match mu {
        0 | 1 => 1,
        2 => 2,
        _ => 3,
    }
}

pub fn pusch_default_tdra(index: u8, mu: u8) -> Option<TdraRow> {
    PUSCH_DEFAULT_A.get(index as usize).map(|r| TdraRow { k: r.k + pusch_k2_j(mu), ..*r })
}

/// Msg3 transmission delay Delta of TS 38.214 Table 6.1.2.1.1-5
pub fn msg3_delta(mu: u8) -> u8 {
    match mu {
        0 => 2,
        1 => 3,
        2 => 4,
        _ => 6,
    }
}

/// Decodes a type 1 resource indication value into (rb_start, nr_rbs).
/// None if the allocation does not fit a BWP of `n_bwp` PRBs.
pub fn riv_to_rbs(riv: u32, n_bwp: u16) -> Option<(u16, u16)> {
    let n = n_bwp as u32;
    if n == 0 || riv >= n * (n + 1) / 2 {
        return None;
    }
    let mut nrb = riv / n + 1;
    let mut start = riv % n;
    if nrb + start > n {
        nrb = n - nrb + 2;
        start = n - 1 - start;
    }
    if nrb < 1 || nrb + start > n {
        return None;
    }
    Some((start as u16, nrb as u16))
}

pub fn rbs_to_riv(start: u16, nrb: u16, n_bwp: u16) -> u32 {
    let (s, l, n) = (start as u32, nrb as u32, n_bwp as u32);
    if l - 1 <= n / 2 {
        n * (l - 1) + s
    } else {
        n * (n - l + 1) + (n - 1 - s)
    }
}

/// Bits of a type 1 frequency domain assignment over `n_rb` PRBs
pub fn riv_bits(n_rb: u16) -> usize {
    ceil_log2((n_rb as u64 * (n_rb as u64 + 1)) / 2)
}

pub fn ceil_log2(x: u64) -> usize {
    if x <= 1 {
        return 0;
    }
    (64 - (x - 1).leading_zeros()) as usize
}

/// Bitmap of single-symbol DM-RS positions in the slot. TS 38.211 Tables 7.4.1.1.2-3 and
/// 6.4.1.1.3-3, dmrs-TypeA-Position pos2, no frequency hopping.
pub fn dmrs_symbols(mapping_type_b: bool, start_symbol: u8, nr_symbols: u8, add_pos: u8, is_pusch: bool) -> u16 {
    let add_pos = add_pos.min(3);
    let (l0, offsets): (u8, &[u8]) = if !mapping_type_b {
        let ld = start_symbol + nr_symbols;
        let offs: &[u8] = match (ld, add_pos) {
            (_, 0) | (0..=7, _) => &[],
            (8..=9, _) => &[7],
            (10..=11, 1) | (12, 1) => &[9],
            (10..=11, _) | (12, 2) => &[6, 9],
            (12, _) => &[5, 8, 11],
            (_, 1) => &[11],
            (_, 2) => &[7, 11],
            (_, _) => &[5, 8, 11],
        };
        (2, offs)
    } else {
        let ld = nr_symbols;
        let offs: &[u8] = if !is_pusch {
            match (ld, add_pos) {
                (_, 0) | (0..=4, _) => &[],
                _ => &[4],
            }
        } else {
            match (ld, add_pos) {
                (_, 0) | (0..=4, _) => &[],
                (5..=7, _) => &[4],
                (8..=9, 1) => &[6],
                (8..=9, _) => &[3, 6],
                (10..=11, 1) => &[8],
                (10..=11, 2) => &[4, 8],
                (10..=11, _) => &[3, 6, 9],
                (_, 1) => &[10],
                (_, 2) => &[5, 10],
                (_, _) => &[3, 6, 9],
            }
        };
        (start_symbol, offs)
    };
    let mut bitmap = 1u16 << l0;
    let base = if mapping_type_b { start_symbol } else { 0 };
    for o in offsets {
        bitmap |= 1 << (base + o);
    }
    bitmap
}

/// DM-RS REs per PRB per DM-RS symbol
pub fn dmrs_re_per_prb(config_type: u8, cdm_groups: u8) -> u32 {
    (if config_type == 1 { 6 } else { 4 }) * cdm_groups as u32
}

/// (CDM groups without data, port bitmap)
pub type AntennaPorts = (u8, u16);

/// DL antenna ports, DM-RS type 1, maxLength 1. TS 38.212 Table 7.3.1.2.2-1
pub fn dl_antenna_ports(value: u8) -> Option<AntennaPorts> {
    Some(match value {
        0 => (1, 0b0001),
        1 => (1, 0b0010),
        2 => (1, 0b0011),
        3 => (2, 0b0001),
        4 => (2, 0b0010),
        5 => (2, 0b0100),
        6 => (2, 0b1000),
        7 => (2, 0b0011),
        8 => (2, 0b1100),
        9 => (2, 0b0111),
        10 => (2, 0b1111),
        11 => (2, 0b0101),
        _ => return None,
    })
}

/// UL antenna ports, DM-RS type 1, maxLength 1. TS 38.212 Tables 7.3.1.1.2-6, -8 and -9
pub fn ul_antenna_ports(value: u8, transform_precoding: bool, rank: u8) -> Option<AntennaPorts> {
    if transform_precoding {
        return (value < 4).then_some((2, 1 << value));
    }
    Some(match (rank, value) {
        (1, 0) => (1, 0b0001),
        (1, 1) => (1, 0b0010),
        (1, 2) => (2, 0b0001),
        (1, 3) => (2, 0b0010),
        (1, 4) => (2, 0b0100),
        (1, 5) => (2, 0b1000),
        (2, 0) => (1, 0b0011),
        (2, 1) => (2, 0b0011),
        (2, 2) => (2, 0b1100),
        (2, 3) => (2, 0b0101),
        _ => return None,
    })
}

/// Precoding information for 2 antenna ports, codebook based, fully coherent subset.
/// Returns (layers, TPMI). TS 38.212 Tables 7.3.1.1.2-4 (maxRank 2) and 7.3.1.1.2-5 (maxRank 1)
pub fn precoding_2ports(value: u8, max_rank: u8) -> Option<(u8, u8)> {
    if max_rank < 2 {
        return (value < 6).then_some((1, value));
    }
    Some(match value {
        0 => (1, 0),
        1 => (1, 1),
        2 => (2, 0),
        3..=6 => (1, value - 1),
        7 => (2, 1),
        8 => (2, 2),
        _ => return None,
    })
}

/// PUCCH TPC in dB, TS 38.213 Table 7.2.1-1
pub const PUCCH_TPC_DB: [i8; 4] = [-1, 0, 1, 3];

/// PUSCH TPC in dB, TS 38.213 Table 7.1.1-1, (accumulated, absolute)
pub fn pusch_tpc_db(tpc: u8, accumulation: bool) -> i8 {
    const ACC: [i8; 4] = [-1, 0, 1, 3];
    const ABS: [i8; 4] = [-4, -1, 1, 4];
    if accumulation { ACC[(tpc & 3) as usize] } else { ABS[(tpc & 3) as usize] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_riv_roundtrip_edges() {
        for n in [1u16, 24, 48, 106, 273] {
            for (start, len) in [(0, 1), (0, n), (n - 1, 1), (n / 3, n - n / 3)] {
                let riv = rbs_to_riv(start, len, n);
                assert_eq!(riv_to_rbs(riv, n), Some((start, len)), "n {} start {} len {}", n, start, len);
            }
        }
    }

    #[test]
    fn test_riv_out_of_bwp() {
        // 13 bits cover more than the 5671 RIVs of 106 PRBs
        assert_eq!(riv_bits(106), 13);
        assert_eq!(riv_to_rbs(5670, 106), Some((52, 54)));
        assert_eq!(riv_to_rbs(5671, 106), None);
        assert_eq!(riv_to_rbs(8191, 106), None);
    }

    #[test]
    fn test_tbs_small() {
        // 106 PRBs, 12 symbols, 1 DM-RS symbol type 1 with 2 CDM groups, MCS 9 table 1
        let p = TbsParams {
            nb_rb: 106,
            nb_symb: 12,
            nb_re_dmrs: 12,
            nb_rb_oh: 0,
            r: mcs_code_rate(McsTable::Qam64, 0),
            qm: mcs_qm(McsTable::Qam64, 0),
            layers: 1,
            scaling: 1.0,
        };
        // N_RE = 132 * 106 = 13992, Ninfo = 3279.4, N'info = 3264
        assert_eq!(compute_tbs(&p), 3368);
    }

    #[test]
    fn test_tbs_large() {
        let p = TbsParams {
            nb_rb: 106,
            nb_symb: 13,
            nb_re_dmrs: 12,
            nb_rb_oh: 0,
            r: mcs_code_rate(McsTable::Qam64, 27),
            qm: mcs_qm(McsTable::Qam64, 27),
            layers: 1,
            scaling: 1.0,
        };
        let tbs = compute_tbs(&p);
        // Byte aligned and above the small-TBS table
        assert!(tbs > 3824);
        assert_eq!((tbs + 24) % 8, 0);
    }

    #[test]
    fn test_reserved_mcs_has_no_rate() {
        assert_eq!(mcs_code_rate(McsTable::Qam64, 29), 0);
        assert_eq!(mcs_qm(McsTable::Qam64, 30), 4);
        assert_eq!(mcs_code_rate(McsTable::Qam256, 28), 0);
        assert_eq!(mcs_qm(McsTable::Qam256, 31), 8);
    }

    #[test]
    fn test_dmrs_positions() {
        // Type A, symbols 2..13, pos1: l0=2 and 11
        assert_eq!(dmrs_symbols(false, 2, 12, 1, false), (1 << 2) | (1 << 11));
        // Type A, 2..11 (ld 12), pos2: 2, 6, 9
        assert_eq!(dmrs_symbols(false, 2, 10, 2, false), (1 << 2) | (1 << 6) | (1 << 9));
        // Type B PDSCH, 4 symbols from 9: first symbol only
        assert_eq!(dmrs_symbols(true, 9, 4, 1, false), 1 << 9);
        // PUSCH type A full slot, pos2: 2, 7, 11
        assert_eq!(dmrs_symbols(false, 0, 14, 2, true), (1 << 2) | (1 << 7) | (1 << 11));
    }

    #[test]
    fn test_pusch_default_table_j() {
        assert_eq!(pusch_default_tdra(0, 1), Some(TdraRow { k: 1, mapping_type_b: false, start_symbol: 0, nr_symbols: 14 }));
        assert_eq!(pusch_default_tdra(14, 2).map(|r| r.k), Some(5));
        assert_eq!(pusch_default_tdra(16, 1), None);
    }
}
