use nr_config::McsTable;
use nr_core::{Rnti, RntiType};

use super::DmrsInfo;

/// Per-transport-block PDSCH parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdschTb {
    pub mcs_index: u8,
    pub qam_mod_order: u8,
    /// Target code rate x 1024 x 10
    pub target_code_rate: u16,
    /// Transport block size in bytes
    pub tb_size: u32,
    pub new_data: bool,
    pub rv: u8,
}

#[derive(Debug, Clone)]
pub struct PdschPdu {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub harq_pid: u8,
    pub bwp_start: u16,
    pub bwp_size: u16,
    pub rb_start: u16,
    pub rb_size: u16,
    pub start_symbol: u8,
    pub nr_symbols: u8,
    pub mapping_type_b: bool,
    pub vrb_to_prb_interleaved: bool,
    pub mcs_table: McsTable,
    pub dmrs: DmrsInfo,
    pub nr_layers: u8,
    pub tb1: PdschTb,
    pub tb2: Option<PdschTb>,
    /// Slots from PDSCH to its HARQ-ACK, None if no feedback is sent (SI, RAR)
    pub k1_feedback: Option<u16>,
}

#[derive(Debug, Clone)]
pub enum DlConfigPdu {
    Pdsch(PdschPdu),
}
