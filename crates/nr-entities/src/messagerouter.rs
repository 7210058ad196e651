use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nr_config::SharedConfig;
use nr_core::{NrEntity, SlotTime};
use nr_saps::SapMsg;

use crate::NrEntityTrait;

/// Entities get their tick callbacks in this order. The PHY opens the slot by emitting
/// its indications, the MAC answers them, RRC reacts to what the MAC reported.
const TICK_ORDER: [NrEntity; 3] = [NrEntity::Phy, NrEntity::Mac, NrEntity::Rrc];

pub struct MessageQueue {
    messages: VecDeque<SapMsg>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self { messages: VecDeque::new() }
    }

    pub fn push_back(&mut self, message: SapMsg) {
        self.messages.push_back(message);
    }

    pub fn pop_front(&mut self) -> Option<SapMsg> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

pub struct MessageRouter {
    /// Kept so entities registered later can be handed the same config
    config: SharedConfig,
    entities: HashMap<NrEntity, Box<dyn NrEntityTrait>>,
    msg_queue: MessageQueue,

    /// Current DL slot, incremented each tick and passed to entities
    ts: SlotTime,
}

impl MessageRouter {
    pub fn new(config: SharedConfig) -> Self {
        let mu = config.config().carrier.numerology;
        Self {
            entities: HashMap::new(),
            msg_queue: MessageQueue::new(),
            config,
            ts: SlotTime::new(0, 0, mu),
        }
    }

    pub fn set_dl_time(&mut self, ts: SlotTime) {
        self.ts = ts;
    }

    pub fn get_dl_time(&self) -> SlotTime {
        self.ts
    }

    pub fn get_config(&self) -> SharedConfig {
        self.config.clone()
    }

    pub fn register_entity(&mut self, entity: Box<dyn NrEntityTrait>) {
        let comp_type = entity.entity();
        tracing::debug!("register_entity {:?}", comp_type);
        self.entities.insert(comp_type, entity);
    }

    /// Returns a mut ref to a component of the requested type
    pub fn get_entity(&mut self, comp: NrEntity) -> Option<&mut dyn NrEntityTrait> {
        self.entities.get_mut(&comp).map(|entity| entity.as_mut())
    }

    pub fn submit_message(&mut self, message: SapMsg) {
        tracing::debug!("submit_message {:?}: {:?} -> {:?}", message.get_sap(), message.get_source(), message.get_dest());
        self.msg_queue.push_back(message);
    }

    pub fn deliver_message(&mut self) {
        let Some(message) = self.msg_queue.pop_front() else {
            return;
        };
        tracing::debug!("deliver_message: got {} {:?}: {:?} -> {:?}", message.msg, message.get_sap(), message.get_source(), message.get_dest());

        let dest = *message.get_dest();
        if let Some(entity) = self.entities.get_mut(&dest) {
            entity.rx_prim(&mut self.msg_queue, message);
        } else {
            tracing::warn!("deliver_message: entity {:?} not found for {:?}: {:?} -> {:?}", dest, message.get_sap(), message.get_source(), message.get_dest());
        }
    }

    pub fn deliver_all_messages(&mut self) {
        while !self.msg_queue.is_empty() {
            self.deliver_message();
        }
    }

    pub fn tick_start(&mut self) {
        tracing::info!("--- tick {} ----------------------------", self.ts);
        for target in TICK_ORDER {
            if let Some(entity) = self.entities.get_mut(&target) {
                entity.tick_start(&mut self.msg_queue, self.ts);
            }
        }
    }

    /// Runs end-of-slot callbacks in tick order, delivering what each one produced
    /// before moving on, then advances the slot.
    pub fn tick_end(&mut self) {
        tracing::debug!("############################ end-of-slot ############################");
        for target in TICK_ORDER {
            if let Some(entity) = self.entities.get_mut(&target) {
                tracing::trace!("tick_end for entity {:?}", target);
                entity.tick_end(&mut self.msg_queue, self.ts);
            }
            self.deliver_all_messages();
        }
        self.ts = self.ts.add_slots(1);
    }

    /// Runs the stack for `num_ticks` slots, or until `running` is cleared, or forever.
    pub fn run_stack(&mut self, num_ticks: Option<usize>, running: Option<Arc<AtomicBool>>) {
        let mut ticks: usize = 0;

        loop {
            if let Some(running) = &running {
                if !running.load(Ordering::SeqCst) {
                    tracing::info!("run_stack: stop requested after {} slots", ticks);
                    break;
                }
            }

            self.tick_start();
            self.deliver_all_messages();
            self.tick_end();

            ticks += 1;
            if let Some(num_ticks) = num_ticks {
                if ticks >= num_ticks {
                    break;
                }
            }
        }
    }
}
