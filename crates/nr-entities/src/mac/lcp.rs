//! Logical channel prioritization, TS 38.321 5.4.3.1.
//!
//! Every channel carries a token bucket Bj refilled with its prioritized bit rate. Allocation
//! runs in two passes over the channels in priority order:
//! 1. channels with Bj > 0 get at most Bj bytes each; channels sharing a priority level split
//!    the space left at the start of their level equally;
//! 2. whatever space remains goes to any channel with data, in strict priority order.
//!
//! Bj is decremented by every byte placed and may go negative.

use nr_config::CfgLogicalChannel;
use nr_core::{LcgId, Lcid};

use super::mac_pdu::{UlSubPdu, max_sdu_len, sdu_subheader_len};
use super::rlc_if::RlcInterface;

#[derive(Debug, Clone)]
pub struct LcSchedInfo {
    pub lcid: Lcid,
    pub lcg: Option<LcgId>,
    pub priority: u8,
    /// Bytes per ms, None for an infinite PBR
    pub pbr: Option<u32>,
    /// Cap on bj in bytes
    pub bucket_size: i64,
    pub bj: i64,
}

impl LcSchedInfo {
    fn eligible_first_pass(&self) -> bool {
        self.pbr.is_none() || self.bj > 0
    }

    /// Bytes the first pass may give this channel
    fn first_pass_quota(&self) -> usize {
        match self.pbr {
            None => usize::MAX,
            Some(_) => self.bj.max(0) as usize,
        }
    }
}

pub struct Lcp {
    /// Sorted by priority, highest (lowest value) first. Ties keep configuration order.
    channels: Vec<LcSchedInfo>,
}

impl Lcp {
    pub fn new(lcs: &[CfgLogicalChannel]) -> Self {
        let mut channels: Vec<LcSchedInfo> = lcs
            .iter()
            .map(|lc| {
                // kB/s is bytes per ms
                let bucket_size = lc.pbr_kbytes.map_or(i64::MAX, |pbr| pbr as i64 * lc.bucket_size_duration_ms as i64);
                LcSchedInfo {
                    lcid: lc.lcid,
                    lcg: lc.lcg,
                    priority: lc.priority,
                    pbr: lc.pbr_kbytes,
                    bucket_size,
                    bj: 0,
                }
            })
            .collect();
        channels.sort_by_key(|c| c.priority);
        Self { channels }
    }

    pub fn channels(&self) -> &[LcSchedInfo] {
        &self.channels
    }

    pub fn bj(&self, lcid: Lcid) -> Option<i64> {
        self.channels.iter().find(|c| c.lcid == lcid).map(|c| c.bj)
    }

    /// Refills every bucket for `elapsed_slots` at numerology `mu`, capped at the bucket size
    pub fn update_tokens(&mut self, elapsed_slots: u32, mu: u8) {
        if elapsed_slots == 0 {
            return;
        }
        for c in self.channels.iter_mut() {
            let Some(pbr) = c.pbr else { continue };
            let inc = (pbr as i64 * elapsed_slots as i64) >> mu;
            c.bj = (c.bj + inc).min(c.bucket_size);
        }
    }

    pub fn reset(&mut self) {
        for c in self.channels.iter_mut() {
            c.bj = 0;
        }
    }

    /// Fills up to `space` bytes with MAC SDUs pulled from `rlc`. Returns the subPDUs in
    /// placement order together with the bytes they occupy, subheaders included.
    pub fn allocate(&mut self, space: usize, rlc: &mut dyn RlcInterface) -> (Vec<UlSubPdu>, usize) {
        let mut out = Vec::new();
        let mut remaining = space;

        // Pass 1, one priority level at a time
        let mut level_start = 0;
        while level_start < self.channels.len() {
            let prio = self.channels[level_start].priority;
            let level_end = self.channels[level_start..]
                .iter()
                .position(|c| c.priority != prio)
                .map_or(self.channels.len(), |p| level_start + p);

            let eligible: Vec<usize> = (level_start..level_end)
                .filter(|i| self.channels[*i].eligible_first_pass() && rlc.buffer_status(self.channels[*i].lcid) > 0)
                .collect();
            if !eligible.is_empty() {
                let share = remaining.div_ceil(eligible.len());
                for i in eligible {
                    let room = share.min(remaining);
                    let quota = self.channels[i].first_pass_quota();
                    let placed = self.place(i, max_sdu_len(room).min(quota), rlc, &mut out);
                    remaining -= placed;
                }
            }
            level_start = level_end;
        }

        // Pass 2, strict priority
        for i in 0..self.channels.len() {
            if remaining < 3 {
                break;
            }
            if rlc.buffer_status(self.channels[i].lcid) == 0 {
                continue;
            }
            let placed = self.place(i, max_sdu_len(remaining), rlc, &mut out);
            remaining -= placed;
        }

        (out, space - remaining)
    }

    /// Pulls at most `max_sdu` bytes for channel `i`. Returns the bytes used, subheader included.
    fn place(&mut self, i: usize, max_sdu: usize, rlc: &mut dyn RlcInterface, out: &mut Vec<UlSubPdu>) -> usize {
        if max_sdu == 0 {
            return 0;
        }
        let c = &mut self.channels[i];
        let data = rlc.pull_sdu(c.lcid, max_sdu);
        if data.is_empty() {
            return 0;
        }
        let used = sdu_subheader_len(data.len()) + data.len();
        if c.pbr.is_some() {
            c.bj -= data.len() as i64;
        }
        tracing::trace!("lcp lcid {} placed {} bytes, bj now {}", c.lcid, data.len(), c.bj);
        out.push(UlSubPdu::Sdu { lcid: c.lcid, data });
        used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::rlc_if::LoopbackRlc;
    use nr_core::debug;

    fn lc(lcid: Lcid, priority: u8, pbr_kbytes: Option<u32>) -> CfgLogicalChannel {
        CfgLogicalChannel {
            lcid,
            lcg: Some(0),
            priority,
            pbr_kbytes,
            bucket_size_duration_ms: 100,
            sr_id: None,
            sr_delay_timer_applied: false,
        }
    }

    fn sdu_len(sub: &UlSubPdu) -> (Lcid, usize) {
        match sub {
            UlSubPdu::Sdu { lcid, data } => (*lcid, data.len()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_equal_priority_split() {
        debug::setup_logging_verbose();
        let mut lcp = Lcp::new(&[lc(1, 5, None), lc(2, 5, None)]);
        let (mut rlc, handle) = LoopbackRlc::new();
        handle.send(1, vec![0; 500]);
        handle.send(2, vec![0; 500]);

        // 104 bytes, 100 usable after two subheaders
        let (sdus, used) = lcp.allocate(104, &mut rlc);
        assert_eq!(used, 104);
        let lens: Vec<_> = sdus.iter().map(sdu_len).collect();
        assert_eq!(lens, vec![(1, 50), (2, 50)]);
        for (_, n) in lens {
            assert!(n <= 100usize.div_ceil(2));
        }
    }

    #[test]
    fn test_leftover_goes_to_second_pass() {
        debug::setup_logging_verbose();
        let mut lcp = Lcp::new(&[lc(1, 5, None), lc(2, 5, None)]);
        let (mut rlc, handle) = LoopbackRlc::new();
        handle.send(1, vec![0; 10]);
        handle.send(2, vec![0; 500]);

        let (sdus, used) = lcp.allocate(104, &mut rlc);
        let lens: Vec<_> = sdus.iter().map(sdu_len).collect();
        // lcid 2 gets its half in pass 1 and the space lcid 1 left in pass 2
        assert_eq!(lens, vec![(1, 10), (2, 50), (2, 38)]);
        assert_eq!(used, 104);
    }

    #[test]
    fn test_token_bucket_limits_first_pass() {
        debug::setup_logging_verbose();
        let mut lcp = Lcp::new(&[lc(1, 1, Some(8)), lc(4, 10, None)]);
        let (mut rlc, handle) = LoopbackRlc::new();
        handle.send(1, vec![0; 1000]);
        handle.send(4, vec![0; 1000]);

        // 5 slots at mu 1 is 2.5 ms: 20 bytes at 8 bytes/ms, rounded down
        lcp.update_tokens(5, 1);
        assert_eq!(lcp.bj(1), Some(20));

        let (sdus, _) = lcp.allocate(100, &mut rlc);
        let lens: Vec<_> = sdus.iter().map(sdu_len).collect();
        assert_eq!(lens[0], (1, 20));
        assert_eq!(lens[1], (4, 76));
        assert_eq!(lcp.bj(1), Some(0));
    }

    #[test]
    fn test_bucket_cap() {
        debug::setup_logging_verbose();
        let mut lcp = Lcp::new(&[lc(1, 1, Some(8))]);
        lcp.update_tokens(100_000, 0);
        assert_eq!(lcp.bj(1), Some(800));
    }

    #[test]
    fn test_no_data_no_sdus() {
        debug::setup_logging_verbose();
        let mut lcp = Lcp::new(&[lc(1, 1, None)]);
        let (mut rlc, _handle) = LoopbackRlc::new();
        let (sdus, used) = lcp.allocate(100, &mut rlc);
        assert!(sdus.is_empty());
        assert_eq!(used, 0);
    }
}
