//! Field widths and payload sizes derived from the BWP and shared channel configuration,
//! TS 38.212 7.3.1.

use nr_config::UeMacConfig;
use nr_saps::phy_mac::{CoresetType, SearchSpaceType};

use super::tables::{ceil_log2, riv_bits};
use super::{DciField, DciKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DciSizes {
    /// PRBs the fallback DL frequency assignment spans
    pub n_rb_10: u16,
    pub n_rb_00: u16,
    pub n_rb_11: u16,
    pub n_rb_01: u16,
    fdra_10: usize,
    /// After truncation to the 1_0 size
    fdra_00: usize,
    fdra_11: usize,
    fdra_01: usize,
    bwp_ind: usize,
    tdra_11: usize,
    tdra_01: usize,
    vrb_11: usize,
    hop_01: usize,
    second_tb: bool,
    k1_11: usize,
    ports_11: usize,
    ports_01: usize,
    tci: usize,
    csi_req: usize,
    dmrs_init_01: usize,
    sri: usize,
    precoding: usize,
    size_10: usize,
}

fn binomial(n: u32, k: u32) -> u64 {
    (0..k).fold(1u64, |acc, i| acc * (n - i) as u64 / (i + 1) as u64)
}

impl DciSizes {
    pub fn new(cfg: &UeMacConfig, ss_type: SearchSpaceType, coreset: CoresetType) -> Self {
        let carrier = &cfg.carrier;
        let n_rb_10 = if ss_type == SearchSpaceType::Common && coreset == CoresetType::Coreset0 {
            carrier.coreset0_size
        } else {
            carrier.dl_bwp_size
        };
        let n_rb_00 = carrier.ul_bwp_size;
        let fdra_10 = riv_bits(n_rb_10);
        let size_10 = fdra_10 + 28;
        // 0_0 is zero padded, or has its FDRA MSBs truncated, to match 1_0
        let fdra_00_full = riv_bits(n_rb_00);
        let fdra_00 = fdra_00_full.saturating_sub((fdra_00_full + 20).saturating_sub(size_10));

        let n_bwp = carrier.num_dedicated_bwps as u64;
        let bwp_ind = if n_bwp <= 3 { ceil_log2(n_bwp + 1) } else { ceil_log2(n_bwp) };

        let pdsch = &cfg.pdsch;
        let pusch = &cfg.pusch;
        let tdra_bits = |len: usize| if len == 0 { 4 } else { ceil_log2(len as u64) };
        let ports_11 = match (pdsch.dmrs_type, pdsch.dmrs_max_length) {
            (1, 1) => 4,
            (1, _) | (_, 1) => 5,
            _ => 6,
        };
        let ports_01 = if pusch.transform_precoding { 2 } else { 3 };
        let sri = if pusch.codebook_tx {
            ceil_log2(pusch.num_srs_resources as u64)
        } else {
            let n = pusch.num_srs_resources as u32;
            let lmax = (pusch.max_rank as u32).min(n);
            ceil_log2((1..=lmax).map(|k| binomial(n, k)).sum())
        };
        let precoding = match (pusch.codebook_tx, pusch.num_antenna_ports) {
            (true, 2) if pusch.max_rank >= 2 => 4,
            (true, 2) => 3,
            _ => 0,
        };

        Self {
            n_rb_10,
            n_rb_00,
            n_rb_11: carrier.dl_bwp_size,
            n_rb_01: carrier.ul_bwp_size,
            fdra_10,
            fdra_00,
            fdra_11: riv_bits(carrier.dl_bwp_size),
            fdra_01: riv_bits(carrier.ul_bwp_size),
            bwp_ind,
            tdra_11: tdra_bits(pdsch.tdra.len()),
            tdra_01: tdra_bits(pusch.tdra.len()),
            vrb_11: pdsch.vrb_to_prb_interleaved as usize,
            hop_01: pusch.freq_hopping as usize,
            second_tb: pdsch.max_codewords == 2,
            k1_11: ceil_log2(pdsch.dl_data_to_ul_ack.len() as u64),
            ports_11,
            ports_01,
            tci: if pdsch.tci_present { 3 } else { 0 },
            csi_req: pusch.csi_request_bits as usize,
            dmrs_init_01: (!pusch.transform_precoding) as usize,
            sri,
            precoding,
            size_10,
        }
    }

    /// PRBs of the BWP the frequency assignment of `kind` refers to
    pub fn n_rb(&self, kind: DciKind) -> u16 {
        match kind {
            DciKind::Ul00 => self.n_rb_00,
            DciKind::Dl11 => self.n_rb_11,
            DciKind::Ul01 => self.n_rb_01,
            _ => self.n_rb_10,
        }
    }

    pub fn width(&self, kind: DciKind, field: DciField) -> usize {
        use DciField::*;
        let fallback = !matches!(kind, DciKind::Dl11 | DciKind::Ul01);
        match field {
            Identifier => 1,
            BwpIndicator => self.bwp_ind,
            Fdra => match kind {
                DciKind::Ul00 => self.fdra_00,
                DciKind::Dl11 => self.fdra_11,
                DciKind::Ul01 => self.fdra_01,
                _ => self.fdra_10,
            },
            Tdra => match kind {
                DciKind::Dl11 => self.tdra_11,
                DciKind::Ul01 => self.tdra_01,
                _ => 4,
            },
            VrbToPrb => if fallback { 1 } else { self.vrb_11 },
            FreqHopping => if fallback { 1 } else { self.hop_01 },
            Mcs => 5,
            Ndi => 1,
            Rv => 2,
            Mcs2 => if self.second_tb { 5 } else { 0 },
            Ndi2 => self.second_tb as usize,
            Rv2 => if self.second_tb { 2 } else { 0 },
            HarqPid => 4,
            Dai => 2,
            Tpc => 2,
            Pri => 3,
            K1 => if fallback { 3 } else { self.k1_11 },
            TbScaling => 2,
            SiIndicator => 1,
            PreambleIndex => 6,
            UlSulIndicator => 1,
            SsbIndex => 6,
            PrachMask => 4,
            AntennaPorts => if kind == DciKind::Dl11 { self.ports_11 } else { self.ports_01 },
            Tci => self.tci,
            SrsRequest => 2,
            CsiRequest => self.csi_req,
            DmrsSeqInit => if kind == DciKind::Dl11 { 1 } else { self.dmrs_init_01 },
            Sri => self.sri,
            Precoding => self.precoding,
            UlschIndicator => 1,
        }
    }

    /// Bits covered by the fields of `kind`
    pub fn fields_size(&self, kind: DciKind) -> usize {
        kind.layout().iter().map(|f| self.width(kind, *f)).sum()
    }

    /// Size of the transmitted payload, including reserved and padding bits
    pub fn payload_size(&self, kind: DciKind) -> usize {
        match kind {
            DciKind::Dl11 | DciKind::Ul01 => self.fields_size(kind),
            _ => self.size_10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_sizes_align() {
        let cfg = UeMacConfig::default();
        let sizes = DciSizes::new(&cfg, SearchSpaceType::Common, CoresetType::Coreset0);
        // CORESET 0 of 48 PRBs: 11 bit FDRA
        assert_eq!(sizes.width(DciKind::Dl10, DciField::Fdra), 11);
        assert_eq!(sizes.payload_size(DciKind::Dl10), 39);
        // The 106 PRB UL BWP needs 13 bits, the rest is padding up to the 1_0 size
        assert_eq!(sizes.width(DciKind::Ul00, DciField::Fdra), 13);
        assert_eq!(sizes.fields_size(DciKind::Ul00), 33);
        assert_eq!(sizes.payload_size(DciKind::Ul00), 39);
        for kind in [DciKind::Dl10Ra, DciKind::Dl10Si, DciKind::PdcchOrder] {
            assert!(sizes.fields_size(kind) <= sizes.payload_size(kind));
        }
    }

    #[test]
    fn test_ul00_fdra_truncated() {
        let mut cfg = UeMacConfig::default();
        cfg.carrier.coreset0_size = 24;
        cfg.carrier.ul_bwp_size = 273;
        let sizes = DciSizes::new(&cfg, SearchSpaceType::Common, CoresetType::Coreset0);
        // 1_0: 9 + 28 bits. 0_0 would need 16 + 20, so 0 bits of truncation
        assert_eq!(sizes.payload_size(DciKind::Dl10), 37);
        assert_eq!(sizes.width(DciKind::Ul00, DciField::Fdra), 16);

        cfg.carrier.coreset0_size = 6;
        let sizes = DciSizes::new(&cfg, SearchSpaceType::Common, CoresetType::Coreset0);
        // 1_0: 5 + 28 = 33 bits, 0_0 loses 3 FDRA MSBs
        assert_eq!(sizes.payload_size(DciKind::Dl10), 33);
        assert_eq!(sizes.width(DciKind::Ul00, DciField::Fdra), 13);
        assert_eq!(sizes.fields_size(DciKind::Ul00), 33);
    }

    #[test]
    fn test_ue_specific_sizes() {
        let mut cfg = UeMacConfig::default();
        cfg.pdsch.max_codewords = 2;
        cfg.pusch.num_antenna_ports = 2;
        cfg.pusch.max_rank = 2;
        cfg.pusch.csi_request_bits = 1;
        let sizes = DciSizes::new(&cfg, SearchSpaceType::UeSpecific, CoresetType::Dedicated);
        assert_eq!(sizes.width(DciKind::Dl10, DciField::Fdra), 13);
        assert_eq!(sizes.width(DciKind::Dl11, DciField::Mcs2), 5);
        assert_eq!(sizes.width(DciKind::Dl11, DciField::K1), 3);
        assert_eq!(sizes.width(DciKind::Ul01, DciField::Precoding), 4);
        assert_eq!(sizes.width(DciKind::Ul01, DciField::Sri), 0);
        // 1 + 1 + 13 + 4 + 5 + 1 + 2 + 4 + 2 + 2 + 0 + 4 + 3 + 2 + 1 + 1 + 1
        assert_eq!(sizes.fields_size(DciKind::Ul01), 47);
    }
}
