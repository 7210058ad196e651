use std::sync::Arc;

use nr_config::{CfgCfra, SharedConfig, UeMacConfig, UeMacState};
use nr_core::rnti::{P_RNTI, SI_RNTI};
use nr_core::{Lcid, NR_MAX_NUM_LCGS, NrEntity, Rnti, RntiType, Sap, SlotTime};
use nr_saps::mac_rrc::{MacRaResultInd, MacSrFailureInd, RrcRaReq};
use nr_saps::phy_mac::{
    DciInd, DlConfigPdu, DlIndication, PdschRxInd, PhySyncInd, ScheduledResponse, SlotInd, SrsPdu, UlConfigPdu,
};
use nr_saps::{SapMsg, SapMsgInner};

use crate::mac::bsr::{self, BsrState, BsrTrigger, LcgBytes};
use crate::mac::dci::{self, DciContext, DciField, DciFields, DciKind, DciSizes, UlGrant};
use crate::mac::errors::MacError;
use crate::mac::harq::{DlHarq, NR_MAX_HARQ_PROCESSES, UlHarq};
use crate::mac::lcp::Lcp;
use crate::mac::mac_pdu::{self, DlSubPdu, UlMacCe, UlSubPdu};
use crate::mac::power::{self, PowerControl};
use crate::mac::pucch::{self, SlotUci};
use crate::mac::ra::{CONT_RES_ID_BYTES, Msg3Content, PrachAssociation, RaOutcome, RaProcedure, RaState, RarResult, rar};
use crate::mac::rlc_if::RlcInterface;
use crate::mac::slot_queue::SlotQueues;
use crate::mac::sr::{self, SchedulingRequests, SrAction};
use crate::mac::timers::ElapsedCounter;
use crate::{MessageQueue, NrEntityTrait};

/// PUSCH waiting for its MAC PDU, collected from the UL queue of one slot
struct PendingPusch {
    index: usize,
    tb_size: usize,
    harq_pid: u8,
    new_data: bool,
    is_msg3: bool,
    rb_size: u16,
}

pub struct UeMac {
    self_component: NrEntity,
    config: SharedConfig,
    cfg: Arc<UeMacConfig>,
    mu: u8,

    dl_queue: SlotQueues<DlConfigPdu>,
    ul_queue: SlotQueues<UlConfigPdu>,
    dl_harq: DlHarq,
    ul_harq: UlHarq,
    /// MAC PDU last sent per UL HARQ process, resent on retransmission grants
    ul_tx_buffers: Vec<Option<Vec<u8>>>,

    ra: RaProcedure,
    prach_assoc: PrachAssociation,
    /// Slot of the PDSCH carrying the RAR, the reference for the Msg3 slot
    rar_pdsch_time: Option<SlotTime>,
    msg3_tpc_db: i8,
    msg3_pdu: Option<Vec<u8>>,

    lcp: Lcp,
    lcp_elapsed: ElapsedCounter,
    bsr: BsrState,
    lcg_order: Vec<nr_core::LcgId>,
    /// Per channel occupancy from the last buffer status check
    lc_bytes: Vec<(Lcid, u32)>,
    sr: SchedulingRequests,
    power: PowerControl,
    rlc: Box<dyn RlcInterface>,

    ssb_index: u8,
    crnti: Option<Rnti>,
}

impl UeMac {
    pub fn new(config: SharedConfig, rlc: Box<dyn RlcInterface>) -> Self {
        let cfg = config.config();
        let mu = cfg.carrier.numerology;
        let slots_per_frame = cfg.carrier.slots_per_frame();
        let capacity = cfg.timing.queue_capacity;
        let prach_assoc = PrachAssociation::new(&cfg.rach, cfg.carrier.ssb_positions)
            .unwrap_or_else(|e| panic!("Invalid RACH configuration: {}", e));
        let crnti = config.state_read().crnti;

        Self {
            self_component: NrEntity::Mac,
            dl_queue: SlotQueues::new("DL", slots_per_frame, capacity),
            ul_queue: SlotQueues::new("UL", slots_per_frame, capacity),
            dl_harq: DlHarq::new(),
            ul_harq: UlHarq::new(),
            ul_tx_buffers: vec![None; NR_MAX_HARQ_PROCESSES],
            ra: RaProcedure::new(&cfg),
            prach_assoc,
            rar_pdsch_time: None,
            msg3_tpc_db: 0,
            msg3_pdu: None,
            lcp: Lcp::new(&cfg.logical_channels),
            lcp_elapsed: ElapsedCounter::default(),
            bsr: BsrState::new(&cfg.bsr, mu),
            lcg_order: bsr::lcg_priority_order(&cfg.logical_channels),
            lc_bytes: Vec::new(),
            sr: SchedulingRequests::new(&cfg.scheduling_requests, mu),
            power: PowerControl::new(cfg.pusch.tpc_accumulation),
            rlc,
            ssb_index: 0,
            crnti,
            mu,
            cfg,
            config,
        }
    }

    pub fn crnti(&self) -> Option<Rnti> {
        self.crnti
    }

    pub fn ra(&self) -> &RaProcedure {
        &self.ra
    }

    pub fn power(&self) -> &PowerControl {
        &self.power
    }

    fn state(&self) -> UeMacState {
        self.config.state_read().mac_state
    }

    fn set_state(&self, state: UeMacState) {
        let mut s = self.config.state_write();
        if s.mac_state != state {
            tracing::info!("mac state {:?} -> {:?}", s.mac_state, state);
        }
        s.mac_state = state;
        s.crnti = self.crnti;
    }

    fn is_connected(&self) -> bool {
        self.state() == UeMacState::Connected
    }

    /// Maps a received RNTI onto the identity it stands for, None if it is not ours
    fn rnti_type(&self, rnti: Rnti) -> Option<RntiType> {
        match rnti {
            SI_RNTI => Some(RntiType::Si),
            P_RNTI => Some(RntiType::P),
            _ if self.ra.ra_rnti() == Some(rnti) => Some(RntiType::Ra),
            _ if self.crnti == Some(rnti) => Some(RntiType::C),
            _ if self.ra.tc_rnti() == Some(rnti) => Some(RntiType::Tc),
            _ => None,
        }
    }

    fn lcg_bytes(&mut self) -> LcgBytes {
        let mut out = [0u32; NR_MAX_NUM_LCGS];
        for lc in self.cfg.logical_channels.iter() {
            if let Some(lcg) = lc.lcg {
                out[lcg as usize] += self.rlc.buffer_status(lc.lcid);
            }
        }
        out
    }

    fn send_response(&self, queue: &mut MessageQueue, time: SlotTime, dl: Vec<DlConfigPdu>, ul: Vec<UlConfigPdu>) {
        let resp = ScheduledResponse { time, dl, ul };
        queue.push_back(SapMsg::new(
            Sap::PhyMac,
            self.self_component,
            NrEntity::Phy,
            time,
            SapMsgInner::MacScheduledResponse(resp),
        ));
    }

    fn send_rrc(&self, queue: &mut MessageQueue, time: SlotTime, msg: SapMsgInner) {
        queue.push_back(SapMsg::new(Sap::MacRrc, self.self_component, NrEntity::Rrc, time, msg));
    }

    /// Starts random access. Msg3 carries the C-RNTI when we have one, otherwise a CCCH SDU
    /// whose first bytes double as the contention resolution identity.
    fn start_ra(&mut self, cfra: Option<CfgCfra>) {
        let msg3 = match self.crnti {
            Some(crnti) => Msg3Content::Crnti(crnti),
            None => {
                let sdu: [u8; CONT_RES_ID_BYTES] = rand::random();
                Msg3Content::Ccch(sdu.to_vec())
            }
        };
        self.ra.start(cfra, msg3, self.ssb_index);
        self.msg3_pdu = None;
        self.rar_pdsch_time = None;
        self.set_state(UeMacState::PerformingRa);
    }

    fn handle_ra_outcome(&mut self, queue: &mut MessageQueue, time: SlotTime, outcome: RaOutcome) {
        match outcome {
            RaOutcome::Completed { crnti, preamble_tx_count } => {
                let crnti = *self.crnti.get_or_insert(crnti);
                let ramp_up = (preamble_tx_count.max(1) as i16 - 1) * self.cfg.rach.power_ramping_step as i16;
                self.power.init_after_ra(ramp_up, self.msg3_tpc_db);
                self.msg3_pdu = None;
                self.msg3_tpc_db = 0;
                self.set_state(UeMacState::Connected);
                tracing::info!(ts = %time, "random access complete, c-rnti {:#06x}", crnti);
                self.send_rrc(
                    queue,
                    time,
                    SapMsgInner::MacRaResultInd(MacRaResultInd { success: true, crnti: Some(crnti), preamble_tx_count }),
                );
            }
            RaOutcome::Failed { preamble_tx_count } => {
                self.msg3_pdu = None;
                self.set_state(if self.crnti.is_some() { UeMacState::Connected } else { UeMacState::Synced });
                self.send_rrc(
                    queue,
                    time,
                    SapMsgInner::MacRaResultInd(MacRaResultInd { success: false, crnti: self.crnti, preamble_tx_count }),
                );
            }
        }
    }

    fn rx_phy_mac_prim(&mut self, queue: &mut MessageQueue, message: SapMsg) {
        tracing::trace!("rx_phy_mac_prim");
        match message.msg {
            SapMsgInner::PhySyncInd(ind) => self.rx_sync_ind(message.time, ind),
            SapMsgInner::PhyDlInd(ind) => self.dl_indication(queue, ind),
            SapMsgInner::PhyUlSlotInd(ind) => self.ul_indication(queue, ind),
            _ => panic!(),
        }
    }

    fn rx_mac_rrc_prim(&mut self, queue: &mut MessageQueue, message: SapMsg) {
        tracing::trace!("rx_mac_rrc_prim");
        let SapMsgInner::RrcRaReq(req) = message.msg else { panic!() };
        self.rx_ra_req(queue, message.time, req);
    }

    fn rx_sync_ind(&mut self, time: SlotTime, ind: PhySyncInd) {
        tracing::info!(ts = %time, "synced to pci {} ssb {}", ind.phys_cell_id, ind.ssb_index);
        if ind.phys_cell_id != self.cfg.carrier.phys_cell_id {
            tracing::warn!("synced pci {} differs from configured {}", ind.phys_cell_id, self.cfg.carrier.phys_cell_id);
        }
        self.ssb_index = ind.ssb_index;
        if self.state() != UeMacState::NotSynced {
            return;
        }
        self.set_state(UeMacState::Synced);
        if self.crnti.is_none() && !self.ra.is_active() {
            // Initial access
            self.start_ra(self.cfg.rach.cfra.clone());
        }
    }

    fn rx_ra_req(&mut self, _queue: &mut MessageQueue, time: SlotTime, req: RrcRaReq) {
        tracing::debug!(ts = %time, "rx_ra_req cfra {:?}", req.cfra);
        if self.state() == UeMacState::NotSynced {
            tracing::warn!("random access requested before sync, ignored");
            return;
        }
        self.start_ra(req.cfra);
    }

    /// Processes one received DL slot: decode results of earlier PDSCHs, then the DCIs
    /// of this slot. Answers with the PDSCH configuration due in the slot.
    pub fn dl_indication(&mut self, queue: &mut MessageQueue, ind: DlIndication) {
        let time = ind.slot.time;
        tracing::trace!(ts = %time, "dl_indication dcis {} rx {}", ind.dcis.len(), ind.rx.len());

        for rx in ind.rx {
            self.rx_pdsch(queue, time, rx);
        }
        for dci in ind.dcis.iter() {
            match self.rx_dci(queue, time, dci) {
                Ok(()) => {}
                Err(e @ (MacError::FalseDci { .. } | MacError::Parse(_) | MacError::NotImplemented { .. })) => {
                    tracing::warn!(ts = %time, "dci for rnti {:#06x} dropped: {}", dci.rnti, e);
                }
                // Already logged where it was detected
                Err(MacError::QueueFull { .. }) => {}
                Err(e @ MacError::Inconsistency { .. }) => {
                    tracing::error!(ts = %time, "dci for rnti {:#06x}: {}", dci.rnti, e);
                }
            }
        }

        let dl = self.dl_queue.take(time);
        self.send_response(queue, time, dl, Vec::new());
    }

    fn rx_dci(&mut self, queue: &mut MessageQueue, time: SlotTime, dci: &DciInd) -> Result<(), MacError> {
        let Some(rnti_type) = self.rnti_type(dci.rnti) else {
            tracing::trace!("dci for foreign rnti {:#06x}", dci.rnti);
            return Ok(());
        };
        let cfg = Arc::clone(&self.cfg);
        let sizes = DciSizes::new(&cfg, dci.ss_type, dci.coreset_type);
        let kind = dci::classify(rnti_type, dci.format, &dci.payload, &sizes)?;
        let fields = dci::decode(kind, &sizes, &dci.payload)?;
        tracing::debug!(ts = %time, "{} {:?}", rnti_type, fields);

        if rnti_type == RntiType::C {
            if let Some(outcome) = self.ra.on_crnti_pdcch() {
                self.handle_ra_outcome(queue, time, outcome);
            }
        }

        let ctx = DciContext {
            cfg: &cfg,
            time,
            rnti: dci.rnti,
            rnti_type,
            n_cce: dci.n_cce,
            n_cce_total: dci.n_cce_total,
        };
        match kind {
            DciKind::PdcchOrder => {
                self.rx_pdcch_order(time, &fields);
                Ok(())
            }
            k if k.is_uplink() => {
                let grant = dci::interpret_ul_grant(&ctx, &sizes, &fields, &self.ul_harq)?;
                self.commit_ul_grant(time, grant)
            }
            _ => self.rx_dl_assignment(&ctx, &sizes, &fields),
        }
    }

    fn rx_pdcch_order(&mut self, time: SlotTime, fields: &DciFields) {
        let preamble_index = fields.get_u8(DciField::PreambleIndex);
        let ssb_index = fields.get_u8(DciField::SsbIndex);
        tracing::info!(ts = %time, "pdcch order, preamble {} ssb {}", preamble_index, ssb_index);
        let cfra = (preamble_index != 0).then_some(CfgCfra { preamble_index, ssb_index });
        self.start_ra(cfra);
    }

    fn rx_dl_assignment(&mut self, ctx: &DciContext, sizes: &DciSizes, fields: &DciFields) -> Result<(), MacError> {
        let a = dci::interpret_dl_assignment(ctx, sizes, fields, &self.dl_harq)?;
        if ctx.rnti_type == RntiType::Ra {
            self.rar_pdsch_time = Some(a.pdsch_time);
        }
        self.dl_queue.push(a.pdsch_time, DlConfigPdu::Pdsch(a.pdsch))?;
        if let Some(h) = a.harq {
            self.dl_harq.update_tb(h.pid, Some(h.ndi), h.r, h.tbs);
            self.dl_harq.set_status(h.pid, a.pdsch_time, h.feedback);
        }
        Ok(())
    }

    /// Queues the PUSCH of `grant` and only then records its HARQ, TPC and BSR side effects
    fn commit_ul_grant(&mut self, time: SlotTime, grant: UlGrant) -> Result<(), MacError> {
        let is_new = grant.is_new_transmission();
        let is_msg3 = grant.pusch.is_msg3;
        let (pusch_time, harq, tpc_db, srs_request) = (grant.pusch_time, grant.harq, grant.tpc_db, grant.srs_request);
        self.ul_queue.push(pusch_time, UlConfigPdu::Pusch(grant.pusch))?;

        if let Some((pid, proc)) = harq {
            self.ul_harq.set(pid, proc);
        }
        if is_msg3 {
            self.msg3_tpc_db = tpc_db;
        } else {
            self.power.apply_pusch_tpc(tpc_db);
            if is_new {
                self.bsr.on_new_grant();
            }
        }
        if let Some(req) = srs_request {
            self.schedule_aperiodic_srs(time, req);
        }
        Ok(())
    }

    fn schedule_aperiodic_srs(&mut self, time: SlotTime, request: u8) {
        let Some(rnti) = self.crnti else { return };
        let floor = self.cfg.timing.min_rx_to_tx_slots;
        for res in self.cfg.srs_resources.iter().filter(|r| r.period.is_none()) {
            let srs_time = time.add_slots(res.aperiodic_slot_offset as i32);
            if res.aperiodic_slot_offset <= floor || !self.cfg.carrier.is_ul_slot(srs_time.slot) {
                tracing::warn!("aperiodic SRS {} for trigger {} has no valid slot at {}", res.id, request, srs_time);
                continue;
            }
            let pdu = SrsPdu {
                rnti,
                resource_id: res.id,
                start_symbol: res.start_symbol,
                nr_symbols: res.nr_symbols,
                comb_size: res.comb_size,
                freq_start: res.freq_start,
                bandwidth_prbs: res.bandwidth_prbs,
                aperiodic: true,
            };
            if self.ul_queue.push(srs_time, UlConfigPdu::Srs(pdu)).is_err() {
                break;
            }
        }
    }

    fn rx_pdsch(&mut self, queue: &mut MessageQueue, time: SlotTime, rx: PdschRxInd) {
        let Some(rnti_type) = self.rnti_type(rx.rnti) else {
            tracing::debug!("pdsch result for foreign rnti {:#06x}", rx.rnti);
            return;
        };
        match rnti_type {
            RntiType::Si | RntiType::P => {
                tracing::trace!("{} pdsch not handled by the MAC", rnti_type);
            }
            RntiType::Ra => {
                let rar_time = self.rar_pdsch_time.take().unwrap_or(time);
                match rx.pdu {
                    Some(pdu) if rx.ack => self.rx_rar(queue, time, rar_time, &pdu),
                    _ => tracing::debug!(ts = %time, "RAR pdsch not decoded"),
                }
            }
            RntiType::C | RntiType::Tc => {
                self.dl_harq.set_ack(rx.harq_pid, rx.tb, rx.ack);
                if let (true, Some(pdu)) = (rx.ack, rx.pdu) {
                    self.rx_dl_mac_pdu(queue, time, rnti_type, &pdu);
                }
            }
        }
    }

    fn rx_rar(&mut self, queue: &mut MessageQueue, time: SlotTime, rar_time: SlotTime, pdu: &[u8]) {
        let subpdus = match rar::parse_rar_pdu(pdu, &[]) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(ts = %time, "RAR parse failed: {}", e);
                return;
            }
        };
        match self.ra.on_rar(&subpdus) {
            RarResult::NoMatch => {}
            RarResult::Done(outcome) => self.handle_ra_outcome(queue, time, outcome),
            RarResult::Msg3 { grant, tc_rnti, timing_advance } => {
                tracing::debug!(ts = %time, "RAR tc-rnti {:#06x} ta {} grant {:?}", tc_rnti, timing_advance, grant);
                let ul = dci::ul_grant::interpret_rar_grant(&self.cfg, rar_time, tc_rnti, &grant)
                    .and_then(|g| self.commit_ul_grant(time, g));
                if let Err(e) = ul {
                    tracing::warn!(ts = %time, "Msg3 grant dropped: {}", e);
                }
            }
        }
    }

    fn rx_dl_mac_pdu(&mut self, queue: &mut MessageQueue, time: SlotTime, rnti_type: RntiType, pdu: &[u8]) {
        let subpdus = match mac_pdu::parse_dl_pdu(pdu) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(ts = %time, "DL MAC PDU parse failed: {}", e);
                return;
            }
        };

        // On the TC-RNTI nothing but the contention resolution identity counts until it matched
        let mut resolved = rnti_type == RntiType::C;
        for sub in subpdus {
            tracing::debug!(ts = %time, "rx {}", sub);
            match sub {
                DlSubPdu::ContentionResolutionId(id) => {
                    if rnti_type != RntiType::Tc {
                        tracing::debug!("contention resolution identity on {} ignored", rnti_type);
                        continue;
                    }
                    match self.ra.on_contention_resolution_id(&id) {
                        Some(outcome @ RaOutcome::Completed { .. }) => {
                            self.handle_ra_outcome(queue, time, outcome);
                            resolved = true;
                        }
                        Some(outcome) => {
                            self.handle_ra_outcome(queue, time, outcome);
                            return;
                        }
                        None if self.ra.tc_rnti().is_none() => return,
                        None => {}
                    }
                }
                DlSubPdu::Sdu { lcid, data } => {
                    if resolved {
                        self.rlc.deliver_sdu(lcid, &data);
                    } else {
                        tracing::debug!("sdu on lcid {} before contention resolution dropped", lcid);
                    }
                }
                DlSubPdu::TimingAdvance { tag_id, ta } => {
                    tracing::info!(ts = %time, "timing advance command tag {} ta {}", tag_id, ta);
                }
                DlSubPdu::DrxCommand | DlSubPdu::LongDrxCommand => {
                    tracing::debug!("DRX not configured, command ignored");
                }
            }
        }
    }

    /// Prepares one UL slot: timers, PRACH, PUSCH payloads, SR, SRS and PUCCH.
    /// Answers with every UL PDU due in the slot.
    pub fn ul_indication(&mut self, queue: &mut MessageQueue, slot: SlotInd) {
        let time = slot.time;
        tracing::trace!(ts = %time, "ul_indication {:?}", slot.slot_type);
        self.tick_timers(queue, time);

        if slot.slot_type.has_uplink() {
            self.schedule_prach(time);
            if self.crnti.is_some() {
                self.update_buffer_status();
            }
            self.build_pusch_payloads(time);
            let sr = self.sr_occasions(queue, time);
            self.schedule_periodic_srs(time);
            self.schedule_uci(time, sr);
        }

        let ul = self.ul_queue.take(time);
        if !ul.is_empty() && !slot.slot_type.has_uplink() {
            tracing::error!(ts = %time, "{} UL PDUs queued for a DL slot dropped", ul.len());
            self.send_response(queue, time, Vec::new(), Vec::new());
            return;
        }
        self.send_response(queue, time, Vec::new(), ul);
    }

    fn tick_timers(&mut self, queue: &mut MessageQueue, time: SlotTime) {
        if let Some(outcome) = self.ra.tick(&self.cfg) {
            self.handle_ra_outcome(queue, time, outcome);
        }
        self.sr.tick();
        let data_in_lcg = self.lcg_bytes().iter().any(|b| *b > 0);
        self.bsr.tick(data_in_lcg);
        self.lcp_elapsed.tick();
    }

    /// The preamble only counts as sent once it is queued. A full queue leaves the
    /// procedure waiting for the next occasion.
    fn schedule_prach(&mut self, time: SlotTime) {
        let mut guard = self.ul_queue.lock(time);
        if guard.len() >= self.ul_queue.capacity() {
            if self.ra.state() == RaState::GeneratePreamble {
                tracing::error!(ts = %time, "UL queue full, PRACH occasion skipped");
            }
            return;
        }
        let Some(pdu) = self.ra.schedule_prach(&self.cfg, &self.prach_assoc, time) else { return };
        // Guard against a retransmission of Msg3 from an earlier attempt
        self.msg3_pdu = None;
        if guard.push(UlConfigPdu::Prach(pdu)).is_err() {
            tracing::error!(ts = %time, "PRACH PDU not queued");
        }
    }

    fn update_buffer_status(&mut self) {
        let cfg = Arc::clone(&self.cfg);
        self.lc_bytes = cfg.logical_channels.iter().map(|lc| (lc.lcid, self.rlc.buffer_status(lc.lcid))).collect();
        self.bsr.update_buffers(&cfg.logical_channels, &self.lc_bytes);
        if self.sr.any_pending() && self.lc_bytes.iter().all(|(_, b)| *b == 0) {
            tracing::debug!("no data left, cancelling pending SRs");
            self.sr.cancel_all();
        }
    }

    fn build_pusch_payloads(&mut self, time: SlotTime) {
        let pending: Vec<PendingPusch> = self
            .ul_queue
            .lock(time)
            .iter()
            .enumerate()
            .filter_map(|(index, pdu)| match pdu {
                UlConfigPdu::Pusch(p) if p.ulsch_present && p.payload.is_none() => Some(PendingPusch {
                    index,
                    tb_size: p.tb_size as usize,
                    harq_pid: p.harq_pid,
                    new_data: p.new_data,
                    is_msg3: p.is_msg3,
                    rb_size: p.rb_size,
                }),
                _ => None,
            })
            .collect();
        if pending.is_empty() {
            return;
        }

        let mut filled = Vec::with_capacity(pending.len());
        for p in pending {
            let (payload, tx_power) = if p.is_msg3 {
                (self.msg3_payload(time, p.tb_size, p.new_data), self.msg3_power(p.rb_size))
            } else {
                let buffered = self.ul_tx_buffers[p.harq_pid as usize]
                    .as_ref()
                    .filter(|buf| !p.new_data && buf.len() == p.tb_size)
                    .cloned();
                let payload = match buffered {
                    Some(buf) => buf,
                    None => {
                        if !p.new_data {
                            tracing::warn!(ts = %time, "no buffered PDU for UL retransmission on pid {}", p.harq_pid);
                        }
                        self.build_ulsch_payload(time, p.tb_size, Vec::new())
                    }
                };
                self.ul_tx_buffers[p.harq_pid as usize] = Some(payload.clone());
                (payload, self.power.pusch_power(self.cfg.pusch.p0_nominal, self.mu, p.rb_size))
            };
            filled.push((p.index, payload, tx_power));
        }

        let mut guard = self.ul_queue.lock(time);
        for (index, payload, tx_power) in filled {
            if let Some(UlConfigPdu::Pusch(pusch)) = guard.get_mut(index) {
                pusch.payload = Some(payload);
                pusch.tx_power = tx_power;
            }
        }
    }

    fn msg3_power(&self, rb_size: u16) -> i16 {
        let rach = &self.cfg.rach;
        let ramp_up = (self.ra.preamble_tx_count().max(1) as i16 - 1) * rach.power_ramping_step as i16;
        power::msg3_power(
            rach.preamble_received_target_power,
            self.cfg.pusch.msg3_delta_preamble,
            ramp_up,
            self.msg3_tpc_db,
            self.mu,
            rb_size,
        )
    }

    /// Msg3 MAC PDU. Built once per attempt and resent as is on retransmission grants.
    fn msg3_payload(&mut self, time: SlotTime, tb_size: usize, new_data: bool) -> Vec<u8> {
        if let Some(pdu) = &self.msg3_pdu {
            if !new_data || pdu.len() == tb_size {
                if pdu.len() != tb_size {
                    tracing::warn!(ts = %time, "Msg3 retransmission grant of {} bytes for a {} byte PDU", tb_size, pdu.len());
                }
                let mut pdu = pdu.clone();
                pdu.resize(tb_size, 0);
                return pdu;
            }
        }
        let pdu = match self.ra.msg3_sent() {
            Some(Msg3Content::Ccch(sdu)) => {
                let sub = UlSubPdu::Ccch(sdu);
                if sub.encoded_len() > tb_size {
                    tracing::warn!("Msg3 grant of {} bytes too small for the CCCH SDU", tb_size);
                    vec![0; tb_size]
                } else {
                    mac_pdu::build_ul_pdu(&[sub], tb_size)
                }
            }
            Some(Msg3Content::Crnti(crnti)) => {
                self.build_ulsch_payload(time, tb_size, vec![UlSubPdu::Ce(UlMacCe::Crnti(crnti))])
            }
            None => {
                tracing::warn!("Msg3 grant outside contention resolution, sending padding");
                vec![0; tb_size]
            }
        };
        self.msg3_pdu = Some(pdu.clone());
        pdu
    }

    /// Assembles a UL-SCH MAC PDU: `prefix` subPDUs, a regular or periodic BSR if one is
    /// triggered, logical channel data, then a padding BSR if the leftover allows.
    fn build_ulsch_payload(&mut self, time: SlotTime, tb_size: usize, prefix: Vec<UlSubPdu>) -> Vec<u8> {
        let prefix_len: usize = prefix.iter().map(|s| s.encoded_len()).sum();
        if prefix_len > tb_size {
            tracing::warn!("transport block of {} bytes cannot hold {} bytes of control elements", tb_size, prefix_len);
            return vec![0; tb_size];
        }
        let mut space = tb_size - prefix_len;

        let elapsed = self.lcp_elapsed.take();
        self.lcp.update_tokens(elapsed, self.mu);

        let trigger = self.bsr.trigger();
        let reserved = match trigger {
            Some(_) => {
                let need = bsr::bsr_len(&self.lcg_bytes()).min(space);
                if need >= 2 { need } else { 0 }
            }
            None => 0,
        };
        space -= reserved;

        let (sdus, used) = self.lcp.allocate(space, self.rlc.as_mut());
        space -= used;

        let after = self.lcg_bytes();
        let (bsr_ce, bsr_trigger) = if reserved >= 2 {
            (bsr::build_bsr(&after, &self.lcg_order, reserved), trigger)
        } else if space >= 2 {
            (bsr::build_bsr(&after, &self.lcg_order, space), Some(BsrTrigger::Padding))
        } else {
            (None, None)
        };

        let mut subpdus = prefix;
        if let Some(ce) = &bsr_ce {
            tracing::debug!(ts = %time, "{:?} BSR {:?}", bsr_trigger, ce);
            self.bsr.on_bsr_sent(ce);
            let truncated = matches!(ce, UlMacCe::ShortTruncatedBsr { .. } | UlMacCe::LongTruncatedBsr { .. });
            if !truncated {
                self.sr.cancel_all();
            }
            subpdus.push(UlSubPdu::Ce(ce.clone()));
        }
        subpdus.extend(sdus);
        if after.iter().all(|b| *b == 0) && self.sr.any_pending() {
            self.sr.cancel_all();
        }
        mac_pdu::build_ul_pdu(&subpdus, tb_size)
    }

    /// SR state at this slot's occasions as (PUCCH resource, positive)
    fn sr_occasions(&mut self, queue: &mut MessageQueue, time: SlotTime) -> Vec<(u8, bool)> {
        if !self.is_connected() {
            return Vec::new();
        }
        let cfg = Arc::clone(&self.cfg);

        if self.bsr.wants_sr() {
            let triggering = cfg
                .logical_channels
                .iter()
                .filter(|lc| self.lc_bytes.iter().any(|(lcid, b)| *lcid == lc.lcid && *b > 0))
                .min_by_key(|lc| lc.priority);
            match triggering.and_then(|lc| lc.sr_id) {
                Some(sr_id) => self.sr.trigger(sr_id),
                None if triggering.is_some() => {
                    tracing::info!("regular BSR pending without an SR configuration, starting random access");
                    self.start_ra(None);
                    return Vec::new();
                }
                None => {}
            }
        }

        let mut out = Vec::new();
        for res in cfg.pucch.sr_resources.iter().filter(|r| sr::is_sr_occasion(r, time)) {
            match self.sr.at_occasion(res.sr_id) {
                SrAction::None => out.push((res.resource, false)),
                SrAction::Transmit => out.push((res.resource, true)),
                SrAction::Failure => {
                    self.sr.cancel_all();
                    self.send_rrc(queue, time, SapMsgInner::MacSrFailureInd(MacSrFailureInd { sr_id: res.sr_id }));
                    self.start_ra(None);
                    return Vec::new();
                }
            }
        }
        out
    }

    fn schedule_periodic_srs(&mut self, time: SlotTime) {
        let Some(rnti) = self.crnti else { return };
        if !self.is_connected() {
            return;
        }
        let abs = time.frame as i64 * time.slots_per_frame() as i64 + time.slot as i64;
        for res in self.cfg.srs_resources.iter() {
            let Some(period) = res.period.filter(|p| *p > 0) else { continue };
            if (abs - res.offset as i64).rem_euclid(period as i64) != 0 {
                continue;
            }
            let pdu = SrsPdu {
                rnti,
                resource_id: res.id,
                start_symbol: res.start_symbol,
                nr_symbols: res.nr_symbols,
                comb_size: res.comb_size,
                freq_start: res.freq_start,
                bandwidth_prbs: res.bandwidth_prbs,
                aperiodic: false,
            };
            if self.ul_queue.push(time, UlConfigPdu::Srs(pdu)).is_err() {
                break;
            }
        }
    }

    fn schedule_uci(&mut self, time: SlotTime, sr: Vec<(u8, bool)>) {
        let connected = self.is_connected();
        let harq = self.dl_harq.get_downlink_ack(time, self.cfg.pdsch.max_codewords == 2);
        if let Some(ack) = &harq {
            self.power.apply_pucch_tpc(ack.delta_pucch);
        }
        let csi = if connected {
            self.cfg
                .csi_reports
                .iter()
                .filter(|r| pucch::is_csi_occasion(r, time))
                .map(|r| (r.resource, r.nr_bits, 0u64))
                .collect()
        } else {
            Vec::new()
        };
        let uci = SlotUci { sr, csi, harq };

        let Some(rnti) = self.crnti.or(self.ra.tc_rnti()) else {
            if uci.harq.is_some() {
                tracing::warn!(ts = %time, "HARQ-ACK due without an RNTI, dropped");
            }
            return;
        };
        let mut guard = self.ul_queue.lock(time);
        let pdus = pucch::schedule_pucch(&self.cfg, rnti, &uci, connected, &mut guard, &self.power, time);
        for pdu in pdus {
            if guard.push(UlConfigPdu::Pucch(pdu)).is_err() {
                break;
            }
        }
    }

    /// Drops all per-slot and procedure state, used when the configuration is replaced
    fn reset(&mut self) {
        self.dl_queue.clear_all();
        self.ul_queue.clear_all();
        self.dl_harq.reset();
        self.ul_harq.reset();
        self.ul_tx_buffers = vec![None; NR_MAX_HARQ_PROCESSES];
        self.ra.reset();
        self.rar_pdsch_time = None;
        self.msg3_pdu = None;
        self.bsr.reset();
        self.lcp.reset();
        self.sr.cancel_all();
        self.power.reset();
    }
}

impl NrEntityTrait for UeMac {
    fn entity(&self) -> NrEntity {
        NrEntity::Mac
    }

    fn rx_prim(&mut self, queue: &mut MessageQueue, message: SapMsg) {
        tracing::trace!("rx_prim: {}", message.msg);

        match message.sap {
            Sap::PhyMac => {
                self.rx_phy_mac_prim(queue, message);
            }
            Sap::MacRrc => {
                self.rx_mac_rrc_prim(queue, message);
            }
        }
    }

    fn set_config(&mut self, config: SharedConfig) {
        let cfg = config.config();
        let prach_assoc = match PrachAssociation::new(&cfg.rach, cfg.carrier.ssb_positions) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("new configuration rejected: {}", e);
                return;
            }
        };
        tracing::info!("applying new MAC configuration");
        let mu = cfg.carrier.numerology;
        let slots_per_frame = cfg.carrier.slots_per_frame();
        let capacity = cfg.timing.queue_capacity;

        self.dl_queue = SlotQueues::new("DL", slots_per_frame, capacity);
        self.ul_queue = SlotQueues::new("UL", slots_per_frame, capacity);
        self.prach_assoc = prach_assoc;
        self.ra = RaProcedure::new(&cfg);
        self.lcp = Lcp::new(&cfg.logical_channels);
        self.bsr = BsrState::new(&cfg.bsr, mu);
        self.lcg_order = bsr::lcg_priority_order(&cfg.logical_channels);
        self.lc_bytes.clear();
        self.sr = SchedulingRequests::new(&cfg.scheduling_requests, mu);
        self.power = PowerControl::new(cfg.pusch.tpc_accumulation);
        self.mu = mu;
        self.cfg = cfg;
        self.config = config;
        self.reset();
        let state = self.state();
        if state == UeMacState::PerformingRa {
            self.set_state(if self.crnti.is_some() { UeMacState::Connected } else { UeMacState::Synced });
        } else {
            self.set_state(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::rlc_if::LoopbackRlc;
    use nr_core::debug;

    fn filler() -> UlConfigPdu {
        UlConfigPdu::Srs(SrsPdu {
            rnti: 0x4601,
            resource_id: 0,
            start_symbol: 13,
            nr_symbols: 1,
            comb_size: 2,
            freq_start: 0,
            bandwidth_prbs: 4,
            aperiodic: false,
        })
    }

    #[test]
    fn test_prach_waits_for_room_in_ul_queue() {
        debug::setup_logging_verbose();
        let config = SharedConfig::from_config(UeMacConfig::default());
        let (rlc, _handle) = LoopbackRlc::new();
        let mut mac = UeMac::new(config, Box::new(rlc));
        mac.start_ra(None);

        let ro = SlotTime::new(0, 19, 1);
        for _ in 0..mac.ul_queue.capacity() {
            mac.ul_queue.push(ro, filler()).unwrap();
        }
        mac.schedule_prach(ro);
        assert_eq!(mac.ra().state(), RaState::GeneratePreamble);
        assert_eq!(mac.ra().preamble_tx_count(), 0);
        let queued = mac.ul_queue.take(ro);
        assert!(queued.iter().all(|p| matches!(p, UlConfigPdu::Srs(_))));

        // Next occasion has room
        let next = SlotTime::new(1, 19, 1);
        mac.schedule_prach(next);
        assert_eq!(mac.ra().state(), RaState::WaitRar);
        assert_eq!(mac.ra().preamble_tx_count(), 1);
        let queued = mac.ul_queue.take(next);
        assert!(matches!(queued.as_slice(), [UlConfigPdu::Prach(_)]));
    }
}
