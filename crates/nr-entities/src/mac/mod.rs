pub mod bsr;
pub mod dci;
pub mod errors;
pub mod harq;
pub mod lcp;
pub mod mac_pdu;
pub mod power;
pub mod pucch;
pub mod ra;
pub mod rlc_if;
pub mod slot_queue;
pub mod sr;
pub mod timers;

pub mod ue_mac;
