//! Buffer status reporting, TS 38.321 5.4.5

use nr_config::{CfgBsr, CfgLogicalChannel};
use nr_core::{LcgId, Lcid, NR_MAX_NUM_LCGS, NR_MAX_NUM_LCIDS};

use super::mac_pdu::UlMacCe;
use super::timers::NrTimer;

/// Upper bound in bytes of each short BSR index, TS 38.321 Table 6.1.3.1-1.
/// Index 31 stands for anything above the last entry.
const SHORT_BSR_TABLE: [u32; 31] = [
    0, 10, 14, 20, 28, 38, 53, 74, 102, 142, 198, 276, 384, 535, 745, 1038, 1446, 2014, 2806, 3909, 5446, 7587,
    10570, 14726, 20516, 28581, 39818, 55474, 77284, 107669, 150000,
];

/// Upper bound in bytes of each long BSR index, TS 38.321 Table 6.1.3.1-2.
/// Index 254 stands for anything above the last entry, 255 is reserved.
const LONG_BSR_TABLE: [u32; 254] = [
    0, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
    22, 23, 25, 26, 28, 30, 32, 34, 36, 38, 40, 43,
    46, 49, 52, 55, 59, 62, 66, 71, 75, 80, 85, 91,
    97, 103, 110, 117, 124, 132, 141, 150, 160, 170, 181, 193,
    205, 218, 233, 248, 264, 281, 299, 318, 339, 361, 384, 409,
    436, 464, 494, 526, 560, 597, 635, 677, 720, 767, 817, 870,
    926, 987, 1051, 1119, 1191, 1269, 1351, 1439, 1532, 1631, 1737, 1850,
    1970, 2098, 2234, 2379, 2533, 2698, 2873, 3059, 3258, 3469, 3694, 3934,
    4189, 4461, 4751, 5059, 5387, 5737, 6109, 6506, 6928, 7378, 7857, 8367,
    8910, 9488, 10104, 10760, 11458, 12202, 12994, 13838, 14736, 15692, 16711, 17795,
    18951, 20181, 21491, 22885, 24371, 25953, 27638, 29431, 31342, 33376, 35543, 37850,
    40307, 42923, 45709, 48676, 51836, 55200, 58784, 62599, 66663, 70990, 75598, 80505,
    85730, 91295, 97221, 103532, 110252, 117409, 125030, 133146, 141789, 150992, 160793, 171231,
    182345, 194182, 206786, 220209, 234503, 249725, 265935, 283197, 301579, 321155, 342002, 364202,
    387842, 413018, 439827, 468377, 498780, 531156, 565634, 602350, 641449, 683087, 727427, 774645,
    824928, 878475, 935498, 996222, 1060888, 1129752, 1203085, 1281179, 1364342, 1452903, 1547213, 1647644,
    1754595, 1868488, 1989774, 2118933, 2256475, 2402946, 2558924, 2725027, 2901912, 3090279, 3290873, 3504487,
    3731968, 3974215, 4232186, 4506902, 4799451, 5110989, 5442750, 5796046, 6172275, 6572925, 6999582, 7453933,
    7937777, 8453028, 9001725, 9586039, 10208280, 10870913, 11576557, 12328006, 13128233, 13980403, 14887889, 15854280,
    16883401, 17979324, 19146385, 20389201, 21712690, 23122088, 24622972, 26221280, 27923336, 29735875, 31666069, 33721553,
    35910462, 38241455, 40723756, 43367187, 46182206, 49179951, 52372284, 55771835, 59392055, 63247269, 67352729, 71724679,
    76380419, 81338368,
];

/// Smallest short BSR index whose range covers `bytes`
pub fn short_bsr_index(bytes: u32) -> u8 {
    SHORT_BSR_TABLE.partition_point(|&t| t < bytes) as u8
}

/// Smallest long BSR index whose range covers `bytes`
pub fn long_bsr_index(bytes: u32) -> u8 {
    LONG_BSR_TABLE.partition_point(|&t| t < bytes) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BsrTrigger {
    Padding,
    Periodic,
    Regular,
}

/// Buffered bytes per LCG
pub type LcgBytes = [u32; NR_MAX_NUM_LCGS];

/// LCGs ordered by the highest priority of any channel they contain
pub fn lcg_priority_order(lcs: &[CfgLogicalChannel]) -> Vec<LcgId> {
    let mut best: Vec<(u8, LcgId)> = Vec::new();
    for lc in lcs {
        let Some(lcg) = lc.lcg else { continue };
        match best.iter_mut().find(|(_, g)| *g == lcg) {
            Some(entry) => entry.0 = entry.0.min(lc.priority),
            None => best.push((lc.priority, lcg)),
        }
    }
    best.sort();
    best.into_iter().map(|(_, g)| g).collect()
}

/// Bytes a regular or periodic BSR takes, subheader included
pub fn bsr_len(lcg_bytes: &LcgBytes) -> usize {
    match lcg_bytes.iter().filter(|b| **b > 0).count() {
        0 | 1 => 2,
        n => 3 + n,
    }
}

/// Chooses the BSR format that reports `lcg_bytes` in `space` bytes.
///
/// A single LCG with data, or none, is reported in a short BSR. Several LCGs go in a long BSR
/// if it fits; otherwise the report is truncated to the highest priority LCGs: short truncated
/// when only 2 or 3 bytes remain, long truncated beyond that.
pub fn build_bsr(lcg_bytes: &LcgBytes, lcg_order: &[LcgId], space: usize) -> Option<UlMacCe> {
    if space < 2 {
        return None;
    }
    let with_data: Vec<LcgId> = lcg_order.iter().copied().filter(|g| lcg_bytes[*g as usize] > 0).collect();
    if with_data.len() <= 1 {
        let lcg = with_data.first().copied().unwrap_or(0);
        return Some(UlMacCe::ShortBsr { lcg, index: short_bsr_index(lcg_bytes[lcg as usize]) });
    }

    let lcg_bitmap = with_data.iter().fold(0u8, |m, g| m | (1 << g));
    let long_indices = |lcgs: &[LcgId]| {
        let mut sorted = lcgs.to_vec();
        sorted.sort_unstable();
        sorted.iter().map(|g| long_bsr_index(lcg_bytes[*g as usize])).collect::<Vec<u8>>()
    };
    if space >= 3 + with_data.len() {
        return Some(UlMacCe::LongBsr { lcg_bitmap, indices: long_indices(&with_data) });
    }
    if space < 4 {
        let lcg = with_data[0];
        return Some(UlMacCe::ShortTruncatedBsr { lcg, index: short_bsr_index(lcg_bytes[lcg as usize]) });
    }
    let fit = space - 3;
    Some(UlMacCe::LongTruncatedBsr { lcg_bitmap, indices: long_indices(&with_data[..fit]) })
}

/// BSR triggers and timers
pub struct BsrState {
    periodic_timer: NrTimer,
    retx_timer: NrTimer,
    sr_delay_timer: NrTimer,
    regular: bool,
    periodic: bool,
    last_lc_bytes: [u32; NR_MAX_NUM_LCIDS],
}

impl BsrState {
    pub fn new(cfg: &CfgBsr, mu: u8) -> Self {
        let mut periodic_timer = NrTimer::from_subframes(cfg.periodic_timer_sf.unwrap_or(0), mu);
        periodic_timer.start();
        Self {
            periodic_timer,
            retx_timer: NrTimer::from_subframes(cfg.retx_timer_sf, mu),
            sr_delay_timer: NrTimer::from_subframes(cfg.sr_delay_timer_sf.unwrap_or(0), mu),
            regular: false,
            periodic: false,
            last_lc_bytes: [0; NR_MAX_NUM_LCIDS],
        }
    }

    /// Advances the BSR timers by one slot. `data_in_lcg` tells whether any channel
    /// belonging to an LCG has data, which turns a retxBSR expiry into a regular BSR.
    pub fn tick(&mut self, data_in_lcg: bool) {
        if self.periodic_timer.tick() {
            tracing::debug!("periodicBSR-Timer expired");
            self.periodic = true;
        }
        if self.retx_timer.tick() && data_in_lcg {
            tracing::debug!("retxBSR-Timer expired with data pending, regular BSR");
            self.regular = true;
        }
        self.sr_delay_timer.tick();
    }

    /// Compares fresh per-channel occupancy against the last snapshot. New data on a channel
    /// of an LCG triggers a regular BSR if no LCG channel had data, or if it outranks every
    /// channel that had. Returns true if a regular BSR got triggered here.
    pub fn update_buffers(&mut self, lcs: &[CfgLogicalChannel], lc_bytes: &[(Lcid, u32)]) -> bool {
        let best_with_data = lcs
            .iter()
            .filter(|lc| lc.lcg.is_some() && self.last_lc_bytes[lc.lcid as usize] > 0)
            .map(|lc| lc.priority)
            .min();

        let mut trigger: Option<&CfgLogicalChannel> = None;
        for (lcid, bytes) in lc_bytes {
            let Some(lc) = lcs.iter().find(|lc| lc.lcid == *lcid) else { continue };
            let before = self.last_lc_bytes[*lcid as usize];
            if lc.lcg.is_some() && before == 0 && *bytes > 0 {
                let outranks = best_with_data.is_none_or(|p| lc.priority < p);
                if outranks && trigger.is_none_or(|t| lc.priority < t.priority) {
                    trigger = Some(lc);
                }
            }
        }
        for (lcid, bytes) in lc_bytes {
            if let Some(slot) = self.last_lc_bytes.get_mut(*lcid as usize) {
                *slot = *bytes;
            }
        }

        let Some(lc) = trigger else { return false };
        tracing::debug!("regular BSR triggered by new data on lcid {}", lc.lcid);
        self.regular = true;
        if lc.sr_delay_timer_applied {
            self.sr_delay_timer.start();
        } else {
            self.sr_delay_timer.stop();
        }
        true
    }

    pub fn trigger(&self) -> Option<BsrTrigger> {
        if self.regular {
            Some(BsrTrigger::Regular)
        } else if self.periodic {
            Some(BsrTrigger::Periodic)
        } else {
            None
        }
    }

    /// A pending regular BSR asks for an SR unless logicalChannelSR-DelayTimer holds it back
    pub fn wants_sr(&self) -> bool {
        self.regular && !self.sr_delay_timer.is_active()
    }

    /// UL grant for new data received
    pub fn on_new_grant(&mut self) {
        self.retx_timer.start();
    }

    /// A MAC PDU carrying `ce` was built. Cancels every triggered BSR.
    pub fn on_bsr_sent(&mut self, ce: &UlMacCe) {
        let truncated = matches!(ce, UlMacCe::ShortTruncatedBsr { .. } | UlMacCe::LongTruncatedBsr { .. });
        if !truncated {
            self.periodic_timer.start();
        }
        self.retx_timer.start();
        self.sr_delay_timer.stop();
        self.regular = false;
        self.periodic = false;
    }

    pub fn reset(&mut self) {
        self.regular = false;
        self.periodic = false;
        self.retx_timer.stop();
        self.sr_delay_timer.stop();
        self.periodic_timer.start();
        self.last_lc_bytes = [0; NR_MAX_NUM_LCIDS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_config::UeMacConfig;
    use nr_core::debug;

    #[test]
    fn test_index_tables() {
        assert_eq!(short_bsr_index(0), 0);
        assert_eq!(short_bsr_index(1), 1);
        assert_eq!(short_bsr_index(10), 1);
        assert_eq!(short_bsr_index(11), 2);
        assert_eq!(short_bsr_index(150000), 30);
        assert_eq!(short_bsr_index(150001), 31);
        assert_eq!(long_bsr_index(0), 0);
        assert_eq!(long_bsr_index(21), 12);
        assert_eq!(long_bsr_index(81338368), 253);
        assert_eq!(long_bsr_index(u32::MAX), 254);
    }

    #[test]
    fn test_lcg_order_by_best_priority() {
        let cfg = UeMacConfig::default();
        assert_eq!(lcg_priority_order(&cfg.logical_channels), vec![0, 1]);
    }

    #[test]
    fn test_format_selection() {
        debug::setup_logging_verbose();
        let order = [0, 1, 2];
        let mut bytes: LcgBytes = [0; NR_MAX_NUM_LCGS];
        assert_eq!(build_bsr(&bytes, &order, 10), Some(UlMacCe::ShortBsr { lcg: 0, index: 0 }));

        bytes[1] = 100;
        assert_eq!(bsr_len(&bytes), 2);
        assert_eq!(build_bsr(&bytes, &order, 2), Some(UlMacCe::ShortBsr { lcg: 1, index: 8 }));

        bytes[0] = 5;
        bytes[2] = 3000;
        assert_eq!(bsr_len(&bytes), 6);
        assert_eq!(
            build_bsr(&bytes, &order, 6),
            Some(UlMacCe::LongBsr { lcg_bitmap: 0b111, indices: vec![1, 37, 91] })
        );
        // Not enough room: truncated to the highest priority LCGs
        assert_eq!(build_bsr(&bytes, &order, 3), Some(UlMacCe::ShortTruncatedBsr { lcg: 0, index: 1 }));
        assert_eq!(
            build_bsr(&bytes, &order, 5),
            Some(UlMacCe::LongTruncatedBsr { lcg_bitmap: 0b111, indices: vec![1, 37] })
        );
        assert_eq!(build_bsr(&bytes, &order, 1), None);
    }

    #[test]
    fn test_regular_trigger_on_new_higher_priority_data() {
        debug::setup_logging_verbose();
        let cfg = UeMacConfig::default();
        let mut bsr = BsrState::new(&cfg.bsr, 1);
        assert!(bsr.update_buffers(&cfg.logical_channels, &[(1, 0), (4, 500)]));
        assert_eq!(bsr.trigger(), Some(BsrTrigger::Regular));
        bsr.on_bsr_sent(&UlMacCe::ShortBsr { lcg: 1, index: 12 });
        assert_eq!(bsr.trigger(), None);

        // More data on the same channel is not a new trigger
        assert!(!bsr.update_buffers(&cfg.logical_channels, &[(1, 0), (4, 900)]));
        // Higher priority channel gets data
        assert!(bsr.update_buffers(&cfg.logical_channels, &[(1, 20), (4, 900)]));
        assert!(bsr.wants_sr());
    }

    #[test]
    fn test_timers() {
        debug::setup_logging_verbose();
        let cfg = UeMacConfig::default();
        // periodic 10 sf and retx 80 sf at 2 slots per subframe
        let mut bsr = BsrState::new(&cfg.bsr, 1);
        for _ in 0..19 {
            bsr.tick(true);
        }
        assert_eq!(bsr.trigger(), None);
        bsr.tick(true);
        assert_eq!(bsr.trigger(), Some(BsrTrigger::Periodic));
        assert!(!bsr.wants_sr());

        bsr.on_bsr_sent(&UlMacCe::ShortBsr { lcg: 0, index: 3 });
        for _ in 0..160 {
            bsr.tick(true);
        }
        assert_eq!(bsr.trigger(), Some(BsrTrigger::Regular));
    }
}
