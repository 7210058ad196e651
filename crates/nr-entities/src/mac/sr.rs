//! Scheduling request, TS 38.321 5.4.4

use nr_config::{CfgSchedulingRequest, CfgSrResource};
use nr_core::SlotTime;

use super::timers::NrTimer;

/// Whether `time` is a transmission occasion of `res`
pub fn is_sr_occasion(res: &CfgSrResource, time: SlotTime) -> bool {
    if res.period == 0 {
        return false;
    }
    let abs = time.frame as i64 * time.slots_per_frame() as i64 + time.slot as i64;
    (abs - res.offset as i64).rem_euclid(res.period as i64) == 0
}

/// Outcome for one SR configuration at one of its occasions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrAction {
    /// Nothing pending or prohibit timer running: negative SR
    None,
    /// Signal a positive SR on this occasion
    Transmit,
    /// sr-TransMax reached: release PUCCH, cancel SRs and start random access
    Failure,
}

#[derive(Debug, Clone)]
struct SrInfo {
    sr_id: u8,
    trans_max: u16,
    pending: bool,
    counter: u16,
    prohibit: NrTimer,
}

pub struct SchedulingRequests {
    srs: Vec<SrInfo>,
}

impl SchedulingRequests {
    pub fn new(cfg: &[CfgSchedulingRequest], mu: u8) -> Self {
        let srs = cfg
            .iter()
            .map(|c| SrInfo {
                sr_id: c.sr_id,
                trans_max: c.trans_max as u16,
                pending: false,
                counter: 0,
                prohibit: NrTimer::from_ms(c.prohibit_timer_ms as u32, mu),
            })
            .collect();
        Self { srs }
    }

    /// Triggers an SR on `sr_id`. A newly pending SR starts with a zero counter.
    pub fn trigger(&mut self, sr_id: u8) {
        let Some(sr) = self.srs.iter_mut().find(|s| s.sr_id == sr_id) else {
            tracing::warn!("SR triggered on unconfigured sr_id {}", sr_id);
            return;
        };
        if !sr.pending {
            tracing::debug!("SR {} triggered", sr_id);
            sr.pending = true;
            sr.counter = 0;
        }
    }

    pub fn is_pending(&self, sr_id: u8) -> bool {
        self.srs.iter().any(|s| s.sr_id == sr_id && s.pending)
    }

    pub fn any_pending(&self) -> bool {
        self.srs.iter().any(|s| s.pending)
    }

    /// Cancels every pending SR and stops the prohibit timers
    pub fn cancel_all(&mut self) {
        for sr in self.srs.iter_mut() {
            if sr.pending {
                tracing::debug!("SR {} cancelled", sr.sr_id);
            }
            sr.pending = false;
            sr.counter = 0;
            sr.prohibit.stop();
        }
    }

    pub fn tick(&mut self) {
        for sr in self.srs.iter_mut() {
            sr.prohibit.tick();
        }
    }

    /// Called at a valid PUCCH occasion of `sr_id`
    pub fn at_occasion(&mut self, sr_id: u8) -> SrAction {
        let Some(sr) = self.srs.iter_mut().find(|s| s.sr_id == sr_id) else {
            return SrAction::None;
        };
        if !sr.pending || sr.prohibit.is_active() {
            return SrAction::None;
        }
        if sr.counter < sr.trans_max {
            sr.counter += 1;
            sr.prohibit.start();
            tracing::debug!("SR {} transmission {} of {}", sr_id, sr.counter, sr.trans_max);
            SrAction::Transmit
        } else {
            tracing::warn!("SR {} reached sr-TransMax {}", sr_id, sr.trans_max);
            SrAction::Failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_core::debug;

    #[test]
    fn test_occasions() {
        let res = CfgSrResource { sr_id: 0, resource: 3, period: 10, offset: 8 };
        assert!(is_sr_occasion(&res, SlotTime::new(0, 8, 1)));
        assert!(is_sr_occasion(&res, SlotTime::new(0, 18, 1)));
        assert!(is_sr_occasion(&res, SlotTime::new(5, 8, 1)));
        assert!(!is_sr_occasion(&res, SlotTime::new(0, 9, 1)));

        // Period longer than a frame
        let res = CfgSrResource { sr_id: 0, resource: 3, period: 40, offset: 25 };
        assert!(is_sr_occasion(&res, SlotTime::new(1, 5, 1)));
        assert!(!is_sr_occasion(&res, SlotTime::new(0, 5, 1)));
        assert!(is_sr_occasion(&res, SlotTime::new(3, 5, 1)));
    }

    #[test]
    fn test_trans_max_then_failure() {
        debug::setup_logging_verbose();
        let cfg = [CfgSchedulingRequest { sr_id: 0, prohibit_timer_ms: 0, trans_max: 2 }];
        let mut srs = SchedulingRequests::new(&cfg, 1);
        assert_eq!(srs.at_occasion(0), SrAction::None);
        srs.trigger(0);
        assert_eq!(srs.at_occasion(0), SrAction::Transmit);
        assert_eq!(srs.at_occasion(0), SrAction::Transmit);
        assert_eq!(srs.at_occasion(0), SrAction::Failure);
        srs.cancel_all();
        assert!(!srs.any_pending());
        assert_eq!(srs.at_occasion(0), SrAction::None);
    }

    #[test]
    fn test_prohibit_timer() {
        debug::setup_logging_verbose();
        let cfg = [CfgSchedulingRequest { sr_id: 1, prohibit_timer_ms: 2, trans_max: 8 }];
        let mut srs = SchedulingRequests::new(&cfg, 1);
        srs.trigger(1);
        assert_eq!(srs.at_occasion(1), SrAction::Transmit);
        // 2 ms at mu 1 is 4 slots
        for _ in 0..3 {
            srs.tick();
            assert_eq!(srs.at_occasion(1), SrAction::None);
        }
        srs.tick();
        assert_eq!(srs.at_occasion(1), SrAction::Transmit);
        // Retrigger while pending keeps the counter
        srs.trigger(1);
        assert!(srs.is_pending(1));
    }
}
