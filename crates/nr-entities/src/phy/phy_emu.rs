use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use nr_config::SharedConfig;
use nr_core::{NrEntity, Sap, SlotTime};
use nr_saps::phy_mac::{DlConfigPdu, DlIndication, PdschRxInd, PhySyncInd, ScheduledResponse, SlotInd};
use nr_saps::{SapMsg, SapMsgInner};

use crate::{MessageQueue, NrEntityTrait};
use super::gnb::{GnbCommand, GnbEmulator};

/// Cloneable sender for commands to the emulated cell
#[derive(Clone)]
pub struct GnbHandle {
    tx: Sender<GnbCommand>,
}

impl GnbHandle {
    pub fn send(&self, cmd: GnbCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::warn!("gnb command dropped, PHY is gone");
        }
    }
}

/// Stands in for the PHY: delivers slot indications to the MAC and hands whatever the MAC
/// configures to the emulated cell. PDSCH results reach the MAC with the next DL slot.
pub struct PhyEmu {
    self_component: NrEntity,
    config: SharedConfig,
    gnb: GnbEmulator,
    commands: Receiver<GnbCommand>,
    synced: bool,
    pending_rx: Vec<PdschRxInd>,
}

impl PhyEmu {
    pub fn new(config: SharedConfig) -> (Self, GnbHandle) {
        let (tx, rx) = unbounded();
        let gnb = GnbEmulator::new(config.config());
        let phy = Self {
            self_component: NrEntity::Phy,
            config,
            gnb,
            commands: rx,
            synced: false,
            pending_rx: Vec::new(),
        };
        (phy, GnbHandle { tx })
    }

    pub fn gnb(&self) -> &GnbEmulator {
        &self.gnb
    }

    fn send_mac(&self, queue: &mut MessageQueue, time: SlotTime, msg: SapMsgInner) {
        queue.push_back(SapMsg::new(Sap::PhyMac, self.self_component, NrEntity::Mac, time, msg));
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.gnb.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn rx_scheduled_response(&mut self, resp: ScheduledResponse) {
        tracing::trace!("rx_scheduled_response");
        for pdu in resp.dl.iter() {
            let DlConfigPdu::Pdsch(pdsch) = pdu;
            let rx = self.gnb.pdsch_rx(resp.time, pdsch);
            self.pending_rx.push(rx);
        }
        if !resp.ul.is_empty() {
            tracing::debug!(ts = %resp.time, "UL: {}", resp.ul.iter().map(|p| p.name()).collect::<Vec<_>>().join(" "));
            self.gnb.on_ul_slot(resp.time, &resp.ul);
        }
    }
}

impl NrEntityTrait for PhyEmu {
    fn entity(&self) -> NrEntity {
        NrEntity::Phy
    }

    fn rx_prim(&mut self, _queue: &mut MessageQueue, message: SapMsg) {
        tracing::trace!("rx_prim: {}", message.msg);
        match message.msg {
            SapMsgInner::MacScheduledResponse(resp) => self.rx_scheduled_response(resp),
            _ => panic!(),
        }
    }

    fn set_config(&mut self, config: SharedConfig) {
        self.gnb = GnbEmulator::new(config.config());
        self.config = config;
        self.pending_rx.clear();
    }

    fn tick_start(&mut self, queue: &mut MessageQueue, ts: SlotTime) {
        self.drain_commands();
        let cfg = self.config.config();

        if !self.synced {
            self.synced = true;
            let ind = PhySyncInd { phys_cell_id: cfg.carrier.phys_cell_id, ssb_index: 0 };
            self.send_mac(queue, ts, SapMsgInner::PhySyncInd(ind));
        }

        let slot_type = cfg.carrier.slot_type(ts.slot);
        let dcis = if slot_type.has_downlink() {
            let ue_state = self.config.state_read().mac_state;
            self.gnb.dl_slot(ts, ue_state)
        } else {
            Vec::new()
        };
        let ind = DlIndication { slot: SlotInd { time: ts, slot_type }, dcis, rx: std::mem::take(&mut self.pending_rx) };
        self.send_mac(queue, ts, SapMsgInner::PhyDlInd(ind));

        let ul_time = ts.add_slots(cfg.timing.min_rx_to_tx_slots as i32);
        let ind = SlotInd { time: ul_time, slot_type: cfg.carrier.slot_type(ul_time.slot) };
        self.send_mac(queue, ul_time, SapMsgInner::PhyUlSlotInd(ind));
    }
}
