use nr_config::CfgCfra;
use nr_core::Rnti;

/// RRC asks the MAC to start random access, e.g. for a handover or a PDCCH-less reconfiguration.
/// With `cfra` set the dedicated preamble is used and contention resolution is skipped.
#[derive(Debug, Clone, Default)]
pub struct RrcRaReq {
    pub cfra: Option<CfgCfra>,
}

/// Outcome of a random access procedure
#[derive(Debug, Clone)]
pub struct MacRaResultInd {
    pub success: bool,
    /// C-RNTI in use after a successful procedure
    pub crnti: Option<Rnti>,
    /// Number of preambles sent, including the successful one
    pub preamble_tx_count: u8,
}

/// sr-TransMax reached for a scheduling request configuration (TS 38.321 5.4.4).
/// The MAC has cleared its SRs and started random access; RRC should release PUCCH and SRS.
#[derive(Debug, Clone)]
pub struct MacSrFailureInd {
    pub sr_id: u8,
}
