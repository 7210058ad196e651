use nr_core::NrEntity;
use nr_entities::{MessageQueue, NrEntityTrait};
use nr_saps::SapMsg;

/// Stands in for an entity and keeps everything routed to it for later inspection
pub struct Sink {
    component: NrEntity,
    msgqueue: Vec<SapMsg>,
}

impl Sink {
    pub fn new(component: NrEntity) -> Self {
        Self { component, msgqueue: vec![] }
    }

    pub fn take_msgqueue(&mut self) -> Vec<SapMsg> {
        std::mem::take(&mut self.msgqueue)
    }
}

impl NrEntityTrait for Sink {
    fn entity(&self) -> NrEntity {
        self.component
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, message: SapMsg) {
        tracing::debug!(ts = %message.time, "rx_prim: {}", message.msg);
        self.msgqueue.push(message);
    }
}
