use nr_config::{SharedConfig, UeMacConfig, UeState};
use nr_core::{NrEntity, SlotTime};
use nr_entities::mac::rlc_if::{LoopbackRlc, RlcHandle};
use nr_entities::mac::ue_mac::UeMac;
use nr_entities::phy::gnb::GnbEmulator;
use nr_entities::phy::{GnbHandle, PhyEmu};
use nr_entities::{MessageRouter, NrEntityTrait};
use nr_saps::SapMsg;

use super::sink::Sink;

/// Creates a default config for testing. It can still be modified as needed
/// before passing it to the ComponentTest constructor
pub fn default_test_config() -> UeMacConfig {
    UeMacConfig::default()
}

/// Router with the requested entities, sinks in place of the missing ones,
/// and the handles the application would hold
pub struct ComponentTest {
    pub config: SharedConfig,
    pub router: MessageRouter,
    pub sinks: Vec<NrEntity>,
    pub rlc: Option<RlcHandle>,
    pub gnb: Option<GnbHandle>,
}

impl ComponentTest {
    pub fn new(config: UeMacConfig, start_dl_time: Option<SlotTime>) -> Self {
        Self::with_state(config, UeState::default(), start_dl_time)
    }

    /// Starts from a given MAC state, e.g. already connected with a C-RNTI
    pub fn with_state(config: UeMacConfig, state: UeState, start_dl_time: Option<SlotTime>) -> Self {
        let mu = config.carrier.numerology;
        let shared_config = SharedConfig::from_parts(config, state);
        let mut mr = MessageRouter::new(shared_config.clone());
        mr.set_dl_time(start_dl_time.unwrap_or(SlotTime::new(0, 0, mu)));

        Self { config: shared_config, router: mr, sinks: vec![], rlc: None, gnb: None }
    }

    pub fn get_shared_config(&self) -> SharedConfig {
        self.config.clone()
    }

    pub fn populate_entities(&mut self, components: Vec<NrEntity>, sinks: Vec<NrEntity>) {
        for component in components.iter() {
            match component {
                NrEntity::Phy => {
                    let (phy, gnb) = PhyEmu::new(self.config.clone());
                    self.gnb = Some(gnb);
                    self.register_entity(phy);
                }
                NrEntity::Mac => {
                    let (rlc, handle) = LoopbackRlc::new();
                    self.rlc = Some(handle);
                    let mac = UeMac::new(self.config.clone(), Box::new(rlc));
                    self.register_entity(mac);
                }
                _ => {
                    panic!("Component not implemented: {:?}", component);
                }
            }
        }

        for sink in sinks.iter() {
            assert!(!self.sinks.contains(sink), "Sink already exists: {:?}", sink);
            assert!(self.router.get_entity(*sink).is_none(), "Sink already registered as entity: {:?}", sink);
            self.sinks.push(*sink);
            self.register_entity(Sink::new(*sink));
        }
    }

    pub fn register_entity<T: 'static + NrEntityTrait>(&mut self, entity: T) {
        self.router.register_entity(Box::new(entity));
    }

    pub fn run_stack(&mut self, num_ticks: usize) {
        self.router.run_stack(Some(num_ticks), None);
    }

    pub fn submit_message(&mut self, message: SapMsg) {
        self.router.submit_message(message);
    }

    pub fn deliver_all_messages(&mut self) {
        self.router.deliver_all_messages();
    }

    pub fn dump_sinks(&mut self) -> Vec<SapMsg> {
        let mut msgs = vec![];
        for sink in self.sinks.iter() {
            if let Some(component) = self.router.get_entity(*sink) {
                if let Some(sink) = component.as_any_mut().downcast_mut::<Sink>() {
                    msgs.append(&mut sink.take_msgqueue());
                }
            }
        }
        msgs
    }

    pub fn mac(&mut self) -> &mut UeMac {
        self.router
            .get_entity(NrEntity::Mac)
            .and_then(|c| c.as_any_mut().downcast_mut::<UeMac>())
            .expect("no UE MAC registered")
    }

    pub fn gnb_state(&mut self) -> &GnbEmulator {
        self.router
            .get_entity(NrEntity::Phy)
            .and_then(|c| c.as_any_mut().downcast_mut::<PhyEmu>())
            .map(|phy| phy.gnb())
            .expect("no emulated PHY registered")
    }
}
