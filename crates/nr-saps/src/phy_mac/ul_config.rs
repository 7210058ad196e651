use nr_config::{McsTable, PucchFormat};
use nr_core::Rnti;

use super::DmrsInfo;

/// UCI multiplexed onto a PUSCH
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UciOnPusch {
    pub harq_ack_bits: u8,
    pub harq_payload: u64,
    pub csi_part1_bits: u16,
    pub csi_part1_payload: u64,
    pub beta_offset_harq_ack: u8,
    pub beta_offset_csi1: u8,
    pub alpha_scaling: u8,
}

#[derive(Debug, Clone)]
pub struct PuschPdu {
    pub rnti: Rnti,
    pub bwp_start: u16,
    pub bwp_size: u16,
    pub rb_start: u16,
    pub rb_size: u16,
    pub start_symbol: u8,
    pub nr_symbols: u8,
    pub mcs_index: u8,
    pub mcs_table: McsTable,
    pub qam_mod_order: u8,
    /// Target code rate x 1024 x 10
    pub target_code_rate: u16,
    /// Transport block size in bytes
    pub tb_size: u32,
    pub harq_pid: u8,
    pub new_data: bool,
    pub rv: u8,
    pub nr_layers: u8,
    pub tpmi: u8,
    pub transform_precoding: bool,
    pub dmrs: DmrsInfo,
    pub frequency_hopping: bool,
    pub data_scrambling_id: u16,
    /// False for a CSI-only PUSCH scheduled with the UL-SCH indicator cleared
    pub ulsch_present: bool,
    pub uci: UciOnPusch,
    /// dBm
    pub tx_power: i16,
    pub is_msg3: bool,
    /// MAC PDU, filled when the slot is prepared for transmission
    pub payload: Option<Vec<u8>>,
}

impl PuschPdu {
    pub fn end_symbol(&self) -> u8 {
        self.start_symbol + self.nr_symbols
    }
}

#[derive(Debug, Clone)]
pub struct PucchPdu {
    pub rnti: Rnti,
    pub format: PucchFormat,
    pub bwp_start: u16,
    pub bwp_size: u16,
    pub prb_start: u16,
    pub prb_size: u8,
    /// Set when intra-slot frequency hopping is enabled
    pub second_hop_prb: Option<u16>,
    pub start_symbol: u8,
    pub nr_symbols: u8,
    pub initial_cyclic_shift: u8,
    pub time_domain_occ: u8,
    /// Format 0 sequence cyclic shift selected by the ACK/SR state
    pub m_cs: u8,
    pub n_harq: u8,
    pub n_sr: u8,
    pub n_csi: u16,
    /// UCI bits, HARQ-ACK in the LSBs
    pub payload: u64,
    pub sr_flag: bool,
    pub hopping_id: u16,
    pub data_scrambling_id: u16,
    /// dBm
    pub tx_power: i16,
}

#[derive(Debug, Clone)]
pub struct PrachPdu {
    pub phys_cell_id: u16,
    pub ra_rnti: Rnti,
    pub prach_config_index: u8,
    pub start_symbol: u8,
    /// Index of the frequency-multiplexed occasion, 0..msg1_fdm
    pub fdm_index: u8,
    pub freq_start: u16,
    pub preamble_index: u8,
    pub ssb_index: u8,
    /// dBm
    pub preamble_rx_target_power: i16,
}

#[derive(Debug, Clone)]
pub struct SrsPdu {
    pub rnti: Rnti,
    pub resource_id: u8,
    pub start_symbol: u8,
    pub nr_symbols: u8,
    pub comb_size: u8,
    pub freq_start: u16,
    pub bandwidth_prbs: u16,
    pub aperiodic: bool,
}

#[derive(Debug, Clone)]
pub enum UlConfigPdu {
    Pusch(PuschPdu),
    Pucch(PucchPdu),
    Prach(PrachPdu),
    Srs(SrsPdu),
}

impl UlConfigPdu {
    pub fn name(&self) -> &'static str {
        match self {
            UlConfigPdu::Pusch(_) => "PUSCH",
            UlConfigPdu::Pucch(_) => "PUCCH",
            UlConfigPdu::Prach(_) => "PRACH",
            UlConfigPdu::Srs(_) => "SRS",
        }
    }
}
