#![allow(dead_code)]

/// PHY <-> MAC: slot timing, DCI and PDSCH indications up, per-slot config PDUs down
pub mod phy_mac;

/// MAC <-> RRC: random access requests and outcomes
pub mod mac_rrc;

pub mod sapmsg;

pub use sapmsg::*;
