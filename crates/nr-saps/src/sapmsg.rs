use core::fmt::Display;

use nr_core::{NrEntity, Sap, SlotTime};

use crate::mac_rrc::*;
use crate::phy_mac::*;

/// Exhaustive list of primitives exchanged through the router
#[derive(Debug)]
pub enum SapMsgInner {
    // PHY -> MAC
    PhySyncInd(PhySyncInd),
    PhyDlInd(DlIndication),
    PhyUlSlotInd(SlotInd),

    // MAC -> PHY
    MacScheduledResponse(ScheduledResponse),

    // RRC -> MAC
    RrcRaReq(RrcRaReq),

    // MAC -> RRC
    MacRaResultInd(MacRaResultInd),
    MacSrFailureInd(MacSrFailureInd),
}

impl Display for SapMsgInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SapMsgInner::PhySyncInd(_) => write!(f, "PhySyncInd"),
            SapMsgInner::PhyDlInd(_) => write!(f, "PhyDlInd"),
            SapMsgInner::PhyUlSlotInd(_) => write!(f, "PhyUlSlotInd"),
            SapMsgInner::MacScheduledResponse(_) => write!(f, "MacScheduledResponse"),
            SapMsgInner::RrcRaReq(_) => write!(f, "RrcRaReq"),
            SapMsgInner::MacRaResultInd(_) => write!(f, "MacRaResultInd"),
            SapMsgInner::MacSrFailureInd(_) => write!(f, "MacSrFailureInd"),
        }
    }
}

#[derive(Debug)]
pub struct SapMsg {
    pub sap: Sap,
    pub src: NrEntity,
    pub dest: NrEntity,
    /// Slot the message refers to
    pub time: SlotTime,
    pub msg: SapMsgInner,
}

impl SapMsg {
    pub fn new(sap: Sap, src: NrEntity, dest: NrEntity, time: SlotTime, msg: SapMsgInner) -> Self {
        Self { sap, src, dest, time, msg }
    }

    pub fn get_source(&self) -> &NrEntity {
        &self.src
    }
    pub fn get_dest(&self) -> &NrEntity {
        &self.dest
    }
    pub fn get_sap(&self) -> &Sap {
        &self.sap
    }
}
