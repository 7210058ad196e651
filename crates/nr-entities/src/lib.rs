#![allow(dead_code)]

pub mod entity_trait;
pub mod mac;
pub mod messagerouter;
pub mod phy;

// Re-export commonly used items from router
pub use entity_trait::NrEntityTrait;
pub use messagerouter::{MessageQueue, MessageRouter};
