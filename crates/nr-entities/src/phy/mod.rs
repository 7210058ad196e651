//! Emulated physical layer with a minimal cell behind it, for running the MAC without radio hardware

pub mod gnb;
pub mod phy_emu;

pub use gnb::{GnbCommand, GnbEmulator, GnbStats};
pub use phy_emu::{GnbHandle, PhyEmu};
