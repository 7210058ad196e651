//! Core utilities for the NR UE MAC stack
//!
//! This crate provides the leaf types used across the stack:
//! - BitBuffer for bit-level DCI, RAR and MAC PDU handling
//! - SlotTime for frame/slot arithmetic at a given numerology
//! - RNTI values and types
//! - Entity and SAP identifiers used for message routing
//! - Parse errors, common macros and logging setup

pub mod bitbuffer;
pub mod debug;
pub mod nr_entities;
pub mod pdu_parse_error;
pub mod rnti;
pub mod slot_time;

// Re-export commonly used items
pub use bitbuffer::BitBuffer;
pub use nr_entities::{NrEntity, Sap};
pub use pdu_parse_error::PduParseErr;
pub use rnti::{Rnti, RntiType};
pub use slot_time::SlotTime;

/// Logical channel identity, 0..=32 for DL/UL SDUs
pub type Lcid = u8;

/// Logical channel group, 0..=7
pub type LcgId = u8;

/// Maximum number of logical channel groups reported in a BSR
pub const NR_MAX_NUM_LCGS: usize = 8;

/// Highest logical channel id carried in a MAC subheader for data
pub const NR_MAX_NUM_LCIDS: usize = 33;

/// Slot type as signalled by the PHY with each slot indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    Downlink,
    Uplink,
    /// Special slot carrying both DL and UL symbols
    Mixed,
    Sidelink,
}

impl SlotType {
    pub fn has_uplink(self) -> bool {
        matches!(self, SlotType::Uplink | SlotType::Mixed)
    }

    pub fn has_downlink(self) -> bool {
        matches!(self, SlotType::Downlink | SlotType::Mixed)
    }
}
