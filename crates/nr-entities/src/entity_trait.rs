use as_any::AsAny;
use nr_config::SharedConfig;
use nr_core::{NrEntity, SlotTime};
use nr_saps::SapMsg;

use crate::MessageQueue;

/// Trait for UE stack entities
/// Used by MessageRouter for passing messages between entities
pub trait NrEntityTrait: Send + AsAny {
    /// Returns the entity type identifier
    fn entity(&self) -> NrEntity;

    /// Handle incoming SAP primitive
    fn rx_prim(&mut self, queue: &mut MessageQueue, message: SapMsg);

    /// Update configuration (optional)
    fn set_config(&mut self, _config: SharedConfig) {}

    /// Called at the start of each slot
    fn tick_start(&mut self, _queue: &mut MessageQueue, _ts: SlotTime) {}

    /// Called at the end of each slot
    fn tick_end(&mut self, _queue: &mut MessageQueue, _ts: SlotTime) -> bool {
        false
    }
}
