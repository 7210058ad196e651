//! UE MAC configuration management
//!
//! This crate holds the configuration objects the MAC consumes once RRC has parsed them:
//! - Carrier, bandwidth part and TDD pattern
//! - PDSCH/PUSCH/PUCCH/CSI/SRS/RACH dedicated and common parameters
//! - Logical channels, scheduling requests and BSR timers
//! - TOML loading for standalone runs

pub mod ue_config;
pub mod toml_config;

pub use ue_config::*;
pub use toml_config::*;
