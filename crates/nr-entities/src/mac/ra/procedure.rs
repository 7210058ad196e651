use core::fmt;

use nr_config::{CfgCfra, UeMacConfig};
use nr_core::{Rnti, SlotTime};
use nr_saps::phy_mac::PrachPdu;

use super::prach_assoc::PrachAssociation;
use super::rar::{self, RarGrant, RarSubPdu};
use crate::mac::timers::NrTimer;

/// Size of the UE contention resolution identity, TS 38.321 6.1.3.4
pub const CONT_RES_ID_BYTES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaState {
    Idle,
    GeneratePreamble,
    WaitRar,
    WaitContentionResolution,
    Succeeded,
}

impl fmt::Display for RaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What Msg3 carries, which also decides how contention is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg3Content {
    /// RRC setup or reestablishment request, resolved by the UE contention resolution identity
    Ccch(Vec<u8>),
    /// Already connected, resolved by a PDCCH addressed to this C-RNTI
    Crnti(Rnti),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaOutcome {
    Completed { crnti: Rnti, preamble_tx_count: u8 },
    Failed { preamble_tx_count: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RarResult {
    /// No subPDU for our preamble, keep monitoring until the window closes
    NoMatch,
    /// Contention based access continues with Msg3 on this grant
    Msg3 { grant: RarGrant, tc_rnti: Rnti, timing_advance: u16 },
    /// Contention free access is complete
    Done(RaOutcome),
}

/// RA-RNTI of the occasion at `start_symbol` of `slot`, TS 38.321 5.1.3
pub fn ra_rnti(start_symbol: u8, slot: u16, fdm_index: u8, ul_carrier_id: u8) -> Rnti {
    1 + start_symbol as Rnti + 14 * slot + 14 * 80 * fdm_index as Rnti + 14 * 80 * 8 * ul_carrier_id as Rnti
}

/// One random access procedure, TS 38.321 5.1
pub struct RaProcedure {
    state: RaState,
    /// States entered since the procedure was started
    visited: Vec<RaState>,
    cfra: Option<CfgCfra>,
    msg3: Option<Msg3Content>,
    ssb_index: u8,
    preamble_index: u8,
    preamble_tx_counter: u8,
    ra_rnti: Rnti,
    rar_window: NrTimer,
    backoff: NrTimer,
    /// Latest backoff indicator, in ms before scaling
    backoff_ms: u32,
    cont_res_timer: NrTimer,
    tc_rnti: Option<Rnti>,
    timing_advance: Option<u16>,
    mu: u8,
}

impl RaProcedure {
    pub fn new(cfg: &UeMacConfig) -> Self {
        let mu = cfg.carrier.numerology;
        Self {
            state: RaState::Idle,
            visited: vec![RaState::Idle],
            cfra: None,
            msg3: None,
            ssb_index: 0,
            preamble_index: 0,
            preamble_tx_counter: 0,
            ra_rnti: 0,
            rar_window: NrTimer::new(cfg.rach.ra_response_window as u32),
            backoff: NrTimer::new(0),
            backoff_ms: 0,
            cont_res_timer: NrTimer::from_subframes(cfg.rach.contention_resolution_timer_sf as u32, mu),
            tc_rnti: None,
            timing_advance: None,
            mu,
        }
    }

    pub fn state(&self) -> RaState {
        self.state
    }

    pub fn visited(&self) -> &[RaState] {
        &self.visited
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, RaState::Idle | RaState::Succeeded)
    }

    pub fn is_contention_free(&self) -> bool {
        self.cfra.is_some()
    }

    pub fn ra_rnti(&self) -> Option<Rnti> {
        (self.state == RaState::WaitRar).then_some(self.ra_rnti)
    }

    pub fn tc_rnti(&self) -> Option<Rnti> {
        self.tc_rnti
    }

    pub fn timing_advance(&self) -> Option<u16> {
        self.timing_advance
    }

    pub fn preamble_tx_count(&self) -> u8 {
        self.preamble_tx_counter
    }

    fn set_state(&mut self, state: RaState) {
        if state != self.state {
            tracing::debug!("ra state {} -> {}", self.state, state);
            self.state = state;
            self.visited.push(state);
        }
    }

    /// Initializes a new procedure. `cfra` selects the contention free variant.
    pub fn start(&mut self, cfra: Option<CfgCfra>, msg3: Msg3Content, ssb_index: u8) {
        if self.is_active() {
            tracing::warn!("ra restarted while in {}", self.state);
        }
        tracing::info!(
            "starting {} random access on ssb {}",
            if cfra.is_some() { "contention free" } else { "contention based" },
            cfra.as_ref().map_or(ssb_index, |c| c.ssb_index)
        );
        self.ssb_index = cfra.as_ref().map_or(ssb_index, |c| c.ssb_index);
        self.cfra = cfra;
        self.msg3 = Some(msg3);
        self.preamble_tx_counter = 0;
        self.backoff_ms = 0;
        self.backoff.stop();
        self.rar_window.stop();
        self.cont_res_timer.stop();
        self.tc_rnti = None;
        self.timing_advance = None;
        self.state = RaState::Idle;
        self.visited = vec![RaState::Idle];
        self.set_state(RaState::GeneratePreamble);
    }

    /// Drops any ongoing procedure
    pub fn reset(&mut self) {
        self.backoff.stop();
        self.rar_window.stop();
        self.cont_res_timer.stop();
        self.msg3 = None;
        self.cfra = None;
        self.tc_rnti = None;
        self.state = RaState::Idle;
    }

    fn select_preamble(&self, cfg: &UeMacConfig, assoc: &PrachAssociation) -> u8 {
        if let Some(cfra) = &self.cfra {
            return cfra.preamble_index;
        }
        let rach = &cfg.rach;
        let offset = assoc.preamble_offset(self.ssb_index, rach.total_preambles);
        let count = rach.cb_preambles_per_ssb.max(1);
        offset + rand::random_range(0..count)
    }

    /// Sends a preamble if the procedure is due for one and `time` has an occasion for the
    /// selected SSB.
    pub fn schedule_prach(&mut self, cfg: &UeMacConfig, assoc: &PrachAssociation, time: SlotTime) -> Option<PrachPdu> {
        if self.state != RaState::GeneratePreamble || self.backoff.is_active() {
            return None;
        }
        let ro = assoc.occasion_for_ssb(time, self.ssb_index)?;
        let rach = &cfg.rach;

        self.preamble_index = self.select_preamble(cfg, assoc);
        self.preamble_tx_counter += 1;
        self.ra_rnti = ra_rnti(ro.start_symbol, time.slot, ro.fdm_index, rach.ul_carrier_id);
        let power = rach.preamble_received_target_power
            + (self.preamble_tx_counter as i16 - 1) * rach.power_ramping_step as i16;

        self.rar_window.start();
        self.set_state(RaState::WaitRar);
        tracing::info!(
            ts = %time,
            "preamble {} attempt {} on ssb {} ra-rnti {:#06x} power {} dBm",
            self.preamble_index,
            self.preamble_tx_counter,
            self.ssb_index,
            self.ra_rnti,
            power
        );

        Some(PrachPdu {
            phys_cell_id: cfg.carrier.phys_cell_id,
            ra_rnti: self.ra_rnti,
            prach_config_index: rach.prach_config_index,
            start_symbol: ro.start_symbol,
            fdm_index: ro.fdm_index,
            freq_start: rach.msg1_frequency_start,
            preamble_index: self.preamble_index,
            ssb_index: self.ssb_index,
            preamble_rx_target_power: power,
        })
    }

    /// Handles an attempt whose RAR or contention resolution never came. The procedure drops
    /// back to idle, then either fails or backs off for another preamble.
    fn attempt_failed(&mut self, cfg: &UeMacConfig) -> Option<RaOutcome> {
        self.rar_window.stop();
        self.cont_res_timer.stop();
        self.tc_rnti = None;
        self.set_state(RaState::Idle);
        if self.preamble_tx_counter >= cfg.rach.preamble_trans_max {
            tracing::warn!("random access failed after {} preambles", self.preamble_tx_counter);
            return Some(RaOutcome::Failed { preamble_tx_count: self.preamble_tx_counter });
        }
        let max_ms = self.backoff_ms * cfg.rach.scaling_factor_bi as u32 / 100;
        let backoff_ms = if max_ms > 0 { rand::random_range(0..=max_ms) } else { 0 };
        self.backoff = NrTimer::from_ms(backoff_ms, self.mu);
        self.backoff.start();
        tracing::debug!("ra attempt {} unsuccessful, backoff {} ms", self.preamble_tx_counter, backoff_ms);
        self.set_state(RaState::GeneratePreamble);
        None
    }

    /// Stops the procedure in idle and reports it failed
    fn abort(&mut self) -> RaOutcome {
        self.rar_window.stop();
        self.cont_res_timer.stop();
        self.backoff.stop();
        self.tc_rnti = None;
        self.set_state(RaState::Idle);
        RaOutcome::Failed { preamble_tx_count: self.preamble_tx_counter }
    }

    /// Advances timers by one slot
    pub fn tick(&mut self, cfg: &UeMacConfig) -> Option<RaOutcome> {
        self.backoff.tick();
        if self.rar_window.tick() && self.state == RaState::WaitRar {
            tracing::debug!("ra response window expired");
            return self.attempt_failed(cfg);
        }
        if self.cont_res_timer.tick() && self.state == RaState::WaitContentionResolution {
            tracing::debug!("contention resolution timer expired");
            return self.attempt_failed(cfg);
        }
        None
    }

    /// Matches a decoded RAR PDU against our preamble
    pub fn on_rar(&mut self, subpdus: &[RarSubPdu]) -> RarResult {
        if self.state != RaState::WaitRar {
            tracing::debug!("RAR ignored in state {}", self.state);
            return RarResult::NoMatch;
        }
        for sub in subpdus {
            match sub {
                RarSubPdu::Backoff { bi } => {
                    self.backoff_ms = rar::backoff_ms(*bi);
                }
                RarSubPdu::RapidOnly { .. } => {}
                RarSubPdu::Rar(r) if r.rapid == self.preamble_index => {
                    self.rar_window.stop();
                    self.timing_advance = Some(r.timing_advance);
                    if let Some(cfra) = &self.cfra {
                        tracing::info!("contention free random access complete with preamble {}", cfra.preamble_index);
                        self.set_state(RaState::Succeeded);
                        return RarResult::Done(RaOutcome::Completed {
                            crnti: r.tc_rnti,
                            preamble_tx_count: self.preamble_tx_counter,
                        });
                    }
                    self.tc_rnti = Some(r.tc_rnti);
                    self.set_state(RaState::WaitContentionResolution);
                    return RarResult::Msg3 { grant: r.grant, tc_rnti: r.tc_rnti, timing_advance: r.timing_advance };
                }
                RarSubPdu::Rar(_) => {}
            }
        }
        RarResult::NoMatch
    }

    /// Called when Msg3 goes out. Returns its content and starts contention resolution.
    pub fn msg3_sent(&mut self) -> Option<Msg3Content> {
        if self.state != RaState::WaitContentionResolution {
            return None;
        }
        if !self.cont_res_timer.is_active() {
            self.cont_res_timer.start();
        }
        self.msg3.clone()
    }

    /// UE contention resolution identity received on the TC-RNTI
    pub fn on_contention_resolution_id(&mut self, id: &[u8; CONT_RES_ID_BYTES]) -> Option<RaOutcome> {
        if !self.awaiting_resolution() {
            return None;
        }
        let matches = match &self.msg3 {
            Some(Msg3Content::Ccch(sdu)) => sdu.len() >= CONT_RES_ID_BYTES && sdu[..CONT_RES_ID_BYTES] == id[..],
            _ => false,
        };
        if !matches {
            tracing::info!("contention resolution identity {:02x?} does not match, random access stopped", id);
            return Some(self.abort());
        }
        self.resolved()
    }

    /// A PDCCH addressed to the C-RNTI sent in Msg3
    pub fn on_crnti_pdcch(&mut self) -> Option<RaOutcome> {
        match &self.msg3 {
            Some(Msg3Content::Crnti(_)) if self.awaiting_resolution() => self.resolved(),
            _ => None,
        }
    }

    /// Msg3 is out and the contention resolution timer runs
    fn awaiting_resolution(&self) -> bool {
        self.state == RaState::WaitContentionResolution && self.cont_res_timer.is_active()
    }

    fn resolved(&mut self) -> Option<RaOutcome> {
        self.cont_res_timer.stop();
        let crnti = match &self.msg3 {
            Some(Msg3Content::Crnti(crnti)) => Some(*crnti),
            _ => self.tc_rnti,
        }?;
        tracing::info!("contention resolved, c-rnti {:#06x}", crnti);
        self.set_state(RaState::Succeeded);
        Some(RaOutcome::Completed { crnti, preamble_tx_count: self.preamble_tx_counter })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::ra::rar::MacRar;
    use nr_core::debug;

    fn setup() -> (UeMacConfig, PrachAssociation, RaProcedure) {
        let cfg = UeMacConfig::default();
        let assoc = PrachAssociation::new(&cfg.rach, cfg.carrier.ssb_positions).unwrap();
        let ra = RaProcedure::new(&cfg);
        (cfg, assoc, ra)
    }

    fn rar_for(rapid: u8, tc_rnti: Rnti) -> RarSubPdu {
        RarSubPdu::Rar(MacRar {
            rapid,
            timing_advance: 31,
            grant: RarGrant { freq_hopping: false, fdra: 100, tdra: 0, mcs: 0, tpc: 3, csi_request: false },
            tc_rnti,
        })
    }

    const RO_SLOT: SlotTime = SlotTime { frame: 4, slot: 19, mu: 1 };

    #[test]
    fn test_ra_rnti() {
        assert_eq!(ra_rnti(0, 0, 0, 0), 1);
        assert_eq!(ra_rnti(0, 19, 0, 0), 1 + 14 * 19);
        assert_eq!(ra_rnti(2, 3, 1, 0), 1 + 2 + 42 + 1120);
    }

    #[test]
    fn test_contention_free_skips_contention_resolution() {
        debug::setup_logging_verbose();
        let (cfg, assoc, mut ra) = setup();
        ra.start(Some(CfgCfra { preamble_index: 55, ssb_index: 0 }), Msg3Content::Crnti(0x4601), 0);

        assert!(ra.schedule_prach(&cfg, &assoc, SlotTime::new(4, 18, 1)).is_none());
        let prach = ra.schedule_prach(&cfg, &assoc, RO_SLOT).unwrap();
        assert_eq!(prach.preamble_index, 55);
        assert_eq!(ra.ra_rnti(), Some(prach.ra_rnti));

        let result = ra.on_rar(&[rar_for(54, 0x1111), rar_for(55, 0x4601)]);
        assert_eq!(result, RarResult::Done(RaOutcome::Completed { crnti: 0x4601, preamble_tx_count: 1 }));
        assert_eq!(
            ra.visited(),
            &[RaState::Idle, RaState::GeneratePreamble, RaState::WaitRar, RaState::Succeeded]
        );
    }

    #[test]
    fn test_contention_based_with_matching_identity() {
        debug::setup_logging_verbose();
        let (cfg, assoc, mut ra) = setup();
        let ccch = vec![0x10, 0x20, 0x30, 0x40, 0x50, 0x60];
        ra.start(None, Msg3Content::Ccch(ccch.clone()), 0);
        let prach = ra.schedule_prach(&cfg, &assoc, RO_SLOT).unwrap();
        assert!(prach.preamble_index < 64);

        let result = ra.on_rar(&[RarSubPdu::Backoff { bi: 2 }, rar_for(prach.preamble_index, 0x5555)]);
        assert!(matches!(result, RarResult::Msg3 { tc_rnti: 0x5555, .. }));
        assert_eq!(ra.state(), RaState::WaitContentionResolution);
        assert_eq!(ra.msg3_sent(), Some(Msg3Content::Ccch(ccch.clone())));

        let id: [u8; 6] = ccch[..6].try_into().unwrap();
        assert_eq!(
            ra.on_contention_resolution_id(&id),
            Some(RaOutcome::Completed { crnti: 0x5555, preamble_tx_count: 1 })
        );
        assert!(ra.visited().contains(&RaState::WaitContentionResolution));
    }

    #[test]
    fn test_identity_mismatch_stops_in_idle() {
        debug::setup_logging_verbose();
        let (cfg, assoc, mut ra) = setup();
        ra.start(None, Msg3Content::Ccch(vec![1, 2, 3, 4, 5, 6]), 0);
        let prach = ra.schedule_prach(&cfg, &assoc, RO_SLOT).unwrap();
        ra.on_rar(&[rar_for(prach.preamble_index, 0x5555)]);
        ra.msg3_sent();
        assert_eq!(ra.on_contention_resolution_id(&[9; 6]), Some(RaOutcome::Failed { preamble_tx_count: 1 }));
        assert_eq!(ra.state(), RaState::Idle);
        assert!(!ra.is_active());
        assert_eq!(ra.tc_rnti(), None);
        assert_eq!(ra.visited().last(), Some(&RaState::Idle));
        assert!(ra.visited().windows(2).any(|w| w == [RaState::WaitContentionResolution, RaState::Idle]));

        // Nothing more goes out until the procedure is started again
        let next = RO_SLOT.add_slots(cfg.carrier.slots_per_frame() as i32);
        assert!(ra.schedule_prach(&cfg, &assoc, next).is_none());
    }

    #[test]
    fn test_window_expiry_passes_through_idle() {
        debug::setup_logging_verbose();
        let (cfg, assoc, mut ra) = setup();
        ra.start(None, Msg3Content::Crnti(0x4601), 0);
        ra.schedule_prach(&cfg, &assoc, RO_SLOT).unwrap();

        let mut outcome = None;
        for _ in 0..cfg.rach.ra_response_window {
            outcome = outcome.or(ra.tick(&cfg));
        }
        assert_eq!(outcome, None);
        assert_eq!(ra.state(), RaState::GeneratePreamble);
        assert_eq!(
            ra.visited(),
            &[RaState::Idle, RaState::GeneratePreamble, RaState::WaitRar, RaState::Idle, RaState::GeneratePreamble]
        );
    }

    #[test]
    fn test_contention_resolution_timeout_passes_through_idle() {
        debug::setup_logging_verbose();
        let (cfg, assoc, mut ra) = setup();
        ra.start(None, Msg3Content::Ccch(vec![1, 2, 3, 4, 5, 6]), 0);
        let prach = ra.schedule_prach(&cfg, &assoc, RO_SLOT).unwrap();
        ra.on_rar(&[rar_for(prach.preamble_index, 0x5555)]);
        ra.msg3_sent();

        let mut outcome = None;
        for _ in 0..1000 {
            if ra.state() != RaState::WaitContentionResolution {
                break;
            }
            outcome = outcome.or(ra.tick(&cfg));
        }
        assert_eq!(outcome, None);
        assert_eq!(ra.state(), RaState::GeneratePreamble);
        assert!(ra.visited().windows(2).any(|w| w == [RaState::WaitContentionResolution, RaState::Idle]));
    }

    #[test]
    fn test_window_expiry_ramps_power_until_failure() {
        debug::setup_logging_verbose();
        let (mut cfg, _, _) = setup();
        cfg.rach.preamble_trans_max = 3;
        let assoc = PrachAssociation::new(&cfg.rach, cfg.carrier.ssb_positions).unwrap();
        let mut ra = RaProcedure::new(&cfg);
        ra.start(None, Msg3Content::Crnti(0x4601), 0);

        let mut time = RO_SLOT;
        let mut powers = vec![];
        let mut outcome = None;
        for _ in 0..400 {
            if let Some(p) = ra.schedule_prach(&cfg, &assoc, time) {
                powers.push(p.preamble_rx_target_power);
            }
            time = time.add_slots(1);
            if let Some(o) = ra.tick(&cfg) {
                outcome = Some(o);
                break;
            }
        }
        assert_eq!(powers, vec![-96, -94, -92]);
        assert_eq!(outcome, Some(RaOutcome::Failed { preamble_tx_count: 3 }));
        assert_eq!(ra.state(), RaState::Idle);
        assert_eq!(ra.visited().iter().filter(|s| **s == RaState::Idle).count(), 4);
    }

    #[test]
    fn test_crnti_msg3_resolved_by_pdcch() {
        debug::setup_logging_verbose();
        let (cfg, assoc, mut ra) = setup();
        ra.start(None, Msg3Content::Crnti(0x4601), 0);
        let prach = ra.schedule_prach(&cfg, &assoc, RO_SLOT).unwrap();
        ra.on_rar(&[rar_for(prach.preamble_index, 0x7777)]);
        assert_eq!(ra.on_crnti_pdcch(), None);
        ra.msg3_sent();
        assert_eq!(ra.on_crnti_pdcch(), Some(RaOutcome::Completed { crnti: 0x4601, preamble_tx_count: 1 }));
    }
}
