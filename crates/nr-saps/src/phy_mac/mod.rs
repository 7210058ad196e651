use nr_core::{BitBuffer, Rnti, SlotTime, SlotType};

mod dl_config;
mod ul_config;

pub use dl_config::*;
pub use ul_config::*;

/// Slot timing indication. The PHY sends one for the DL slot being received and one for the
/// UL slot being prepared, the latter running ahead by the receive-to-transmit turnaround.
#[derive(Debug, Clone, Copy)]
pub struct SlotInd {
    pub time: SlotTime,
    pub slot_type: SlotType,
}

/// Cell found and SSB decoded
#[derive(Debug, Clone, Copy)]
pub struct PhySyncInd {
    pub phys_cell_id: u16,
    pub ssb_index: u8,
}

/// DCI size class monitored by the PHY. Formats of one class have equal size and are told
/// apart by the identifier bit, or by the RNTI for SI-RNTI and RA-RNTI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciFormatGroup {
    /// Formats 0_0 and 1_0
    Fallback,
    /// Formats 0_1 and 1_1
    NonFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSpaceType {
    Common,
    UeSpecific,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoresetType {
    /// CORESET 0, configured by the MIB
    Coreset0,
    /// Any CORESET from the dedicated PDCCH config
    Dedicated,
}

/// A DCI that passed the CRC check against `rnti`
#[derive(Debug, Clone)]
pub struct DciInd {
    pub rnti: Rnti,
    pub format: DciFormatGroup,
    /// Payload bits, MSB first, without CRC
    pub payload: BitBuffer,
    pub ss_type: SearchSpaceType,
    pub coreset_type: CoresetType,
    /// First CCE of the PDCCH candidate
    pub n_cce: u16,
    /// Number of CCEs in the CORESET
    pub n_cce_total: u16,
}

/// Result of decoding one PDSCH transport block
#[derive(Debug, Clone)]
pub struct PdschRxInd {
    pub rnti: Rnti,
    pub harq_pid: u8,
    /// Transport block index, 0 or 1
    pub tb: u8,
    pub ack: bool,
    /// Decoded transport block, present on ACK
    pub pdu: Option<Vec<u8>>,
}

/// Everything received in one DL slot
#[derive(Debug, Clone)]
pub struct DlIndication {
    pub slot: SlotInd,
    pub dcis: Vec<DciInd>,
    pub rx: Vec<PdschRxInd>,
}

/// DM-RS parameters shared by the PDSCH and PUSCH PDUs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmrsInfo {
    pub config_type: u8,
    /// Bit l set if symbol l of the slot carries DM-RS
    pub symb_pos: u16,
    pub num_cdm_grps_no_data: u8,
    /// Bitmap of antenna ports
    pub ports: u16,
    pub scid: u8,
    pub scrambling_id: u16,
}

impl DmrsInfo {
    pub fn num_symbols(&self) -> u32 {
        self.symb_pos.count_ones()
    }
}

/// Finalized configuration for one slot, handed to the PHY.
/// A response carries either the DL list or the UL list of its slot.
#[derive(Debug, Clone)]
pub struct ScheduledResponse {
    pub time: SlotTime,
    pub dl: Vec<DlConfigPdu>,
    pub ul: Vec<UlConfigPdu>,
}
