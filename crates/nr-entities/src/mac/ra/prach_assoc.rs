//! Mapping of transmitted SSBs to PRACH occasions, TS 38.213 8.1.
//!
//! Occasions are numbered frequency first, then by time occasion within a PRACH slot, then
//! by PRACH slot, then by configuration period. The association period is the smallest of
//! 1, 2, 4, 8 or 16 configuration periods that holds at least one full mapping cycle.

use nr_config::CfgRach;
use nr_core::SlotTime;

const ASSOCIATION_PERIODS: [u16; 5] = [1, 2, 4, 8, 16];

/// One PRACH occasion and the SSBs it serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrachOccasion {
    pub start_symbol: u8,
    pub fdm_index: u8,
    /// Bit i set if SSB i maps to this occasion
    pub ssb_mask: u64,
}

impl PrachOccasion {
    pub fn serves(&self, ssb_index: u8) -> bool {
        ssb_index < 64 && (self.ssb_mask >> ssb_index) & 1 == 1
    }
}

/// Precomputed SSB to occasion association over one association period
#[derive(Debug, Clone)]
pub struct PrachAssociation {
    frame_period: u16,
    frame_offset: u16,
    /// Configuration periods per association period
    num_periods: u16,
    slots: Vec<u16>,
    /// Occasions per configuration period, in numbering order
    per_period: usize,
    /// All occasions of the association period, indexed by occasion number
    occasions: Vec<PrachOccasion>,
    ros_per_slot: usize,
    msg1_fdm: usize,
    /// SSB positions in transmission order
    ssbs: Vec<u8>,
    multiple_ssb_per_ro: bool,
    ratio: u8,
}

impl PrachAssociation {
    pub fn new(rach: &CfgRach, ssb_positions: u64) -> Result<Self, &'static str> {
        let ssbs: Vec<u8> = (0..64u8).filter(|i| (ssb_positions >> i) & 1 == 1).collect();
        if ssbs.is_empty() {
            return Err("no SSB transmitted");
        }
        let ros_per_slot = rach.ros_per_slot as usize;
        let msg1_fdm = rach.msg1_fdm as usize;
        let per_period = rach.ro_slots.len() * ros_per_slot * msg1_fdm;
        if per_period == 0 {
            return Err("RACH configuration has no occasions");
        }

        let (multiple_ssb_per_ro, ratio) = rach.ssb_per_ro.ratio();
        let cycle = if multiple_ssb_per_ro {
            ssbs.len().div_ceil(ratio as usize)
        } else {
            ssbs.len() * ratio as usize
        };
        let num_periods = ASSOCIATION_PERIODS
            .iter()
            .copied()
            .find(|p| *p as usize * per_period >= cycle)
            .ok_or("SSBs do not fit 16 RACH configuration periods")?;

        let total = num_periods as usize * per_period;
        // Leftover occasions that do not complete another cycle stay unused
        let usable = (total / cycle) * cycle;
        let mut occasions = Vec::with_capacity(total);
        for ro in 0..total {
            let in_period = ro % per_period;
            let fdm_index = (in_period % msg1_fdm) as u8;
            let time_occ = (in_period / msg1_fdm) % ros_per_slot;
            let mut ssb_mask = 0u64;
            if ro < usable {
                let k = ro % cycle;
                if multiple_ssb_per_ro {
                    let first = k * ratio as usize;
                    for ssb in ssbs.iter().skip(first).take(ratio as usize) {
                        ssb_mask |= 1 << ssb;
                    }
                } else {
                    ssb_mask |= 1 << ssbs[k / ratio as usize];
                }
            }
            occasions.push(PrachOccasion {
                start_symbol: rach.ro_start_symbol + (time_occ as u8) * rach.ro_duration,
                fdm_index,
                ssb_mask,
            });
        }
        tracing::debug!(
            "prach association: {} ssbs, {} occasions per period, association period {} x {} frames",
            ssbs.len(),
            per_period,
            num_periods,
            rach.ro_frame_period
        );

        Ok(Self {
            frame_period: rach.ro_frame_period as u16,
            frame_offset: rach.ro_frame_offset as u16,
            num_periods,
            slots: rach.ro_slots.clone(),
            per_period,
            occasions,
            ros_per_slot,
            msg1_fdm,
            ssbs,
            multiple_ssb_per_ro,
            ratio,
        })
    }

    pub fn association_period_frames(&self) -> u16 {
        self.num_periods * self.frame_period
    }

    /// Occasions in `time`, empty if the slot carries none
    pub fn occasions_in_slot(&self, time: SlotTime) -> &[PrachOccasion] {
        if time.frame % self.frame_period != self.frame_offset % self.frame_period {
            return &[];
        }
        let Some(slot_idx) = self.slots.iter().position(|s| *s == time.slot) else {
            return &[];
        };
        let period_idx = (time.frame / self.frame_period) % self.num_periods;
        let per_slot = self.ros_per_slot * self.msg1_fdm;
        let first = period_idx as usize * self.per_period + slot_idx * per_slot;
        &self.occasions[first..first + per_slot]
    }

    /// First occasion in `time` serving `ssb_index`
    pub fn occasion_for_ssb(&self, time: SlotTime, ssb_index: u8) -> Option<PrachOccasion> {
        self.occasions_in_slot(time).iter().find(|ro| ro.serves(ssb_index)).copied()
    }

    /// Preambles available to `ssb_index` on an occasion shared by several SSBs start at
    /// this offset (TS 38.321 5.1.2).
    pub fn preamble_offset(&self, ssb_index: u8, total_preambles: u8) -> u8 {
        if !self.multiple_ssb_per_ro {
            return 0;
        }
        let rank = self.ssbs.iter().position(|s| *s == ssb_index).unwrap_or(0);
        let per_ssb = total_preambles as usize / self.ratio as usize;
        ((rank % self.ratio as usize) * per_ssb) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_config::SsbPerRo;
    use nr_core::debug;

    fn rach(slots: Vec<u16>, fdm: u8, ssb_per_ro: SsbPerRo) -> CfgRach {
        CfgRach { ro_slots: slots, msg1_fdm: fdm, ssb_per_ro, ..CfgRach::default() }
    }

    #[test]
    fn test_single_ssb_every_frame() {
        debug::setup_logging_verbose();
        let assoc = PrachAssociation::new(&CfgRach::default(), 0x1).unwrap();
        assert_eq!(assoc.association_period_frames(), 1);
        let ro = assoc.occasion_for_ssb(SlotTime::new(7, 19, 1), 0).unwrap();
        assert_eq!((ro.start_symbol, ro.fdm_index), (0, 0));
        assert!(assoc.occasion_for_ssb(SlotTime::new(7, 18, 1), 0).is_none());
    }

    #[test]
    fn test_eight_ssbs_need_longer_association_period() {
        debug::setup_logging_verbose();
        // One occasion per frame, one SSB per occasion: 8 frames to cover all SSBs
        let assoc = PrachAssociation::new(&rach(vec![19], 1, SsbPerRo::One), 0xff).unwrap();
        assert_eq!(assoc.association_period_frames(), 8);
        for frame in 0..16u16 {
            let ros = assoc.occasions_in_slot(SlotTime::new(frame, 19, 1));
            assert_eq!(ros.len(), 1);
            assert!(ros[0].serves((frame % 8) as u8));
        }
    }

    #[test]
    fn test_frequency_multiplexed_ssbs() {
        debug::setup_logging_verbose();
        // Two SSBs on two FDM occasions in the same slot
        let assoc = PrachAssociation::new(&rach(vec![19], 2, SsbPerRo::One), 0b11).unwrap();
        assert_eq!(assoc.association_period_frames(), 1);
        assert_eq!(assoc.occasion_for_ssb(SlotTime::new(0, 19, 1), 1).unwrap().fdm_index, 1);
    }

    #[test]
    fn test_shared_occasion_splits_preambles() {
        debug::setup_logging_verbose();
        let assoc = PrachAssociation::new(&rach(vec![19], 1, SsbPerRo::Two), 0b11).unwrap();
        let ro = assoc.occasion_for_ssb(SlotTime::new(0, 19, 1), 1).unwrap();
        assert!(ro.serves(0) && ro.serves(1));
        assert_eq!(assoc.preamble_offset(0, 64), 0);
        assert_eq!(assoc.preamble_offset(1, 64), 32);
    }

    #[test]
    fn test_one_ssb_over_several_occasions() {
        debug::setup_logging_verbose();
        let assoc = PrachAssociation::new(&rach(vec![9, 19], 1, SsbPerRo::OneHalf), 0b11).unwrap();
        // SSB0 -> occasions 0 and 1, SSB1 -> occasions 2 and 3: two frames
        assert_eq!(assoc.association_period_frames(), 2);
        assert!(assoc.occasion_for_ssb(SlotTime::new(0, 9, 1), 0).is_some());
        assert!(assoc.occasion_for_ssb(SlotTime::new(0, 19, 1), 0).is_some());
        assert!(assoc.occasion_for_ssb(SlotTime::new(1, 9, 1), 1).is_some());
        assert!(assoc.occasion_for_ssb(SlotTime::new(1, 9, 1), 0).is_none());
    }

    #[test]
    fn test_too_many_ssbs() {
        debug::setup_logging_verbose();
        assert!(PrachAssociation::new(&rach(vec![19], 1, SsbPerRo::OneEighth), u64::MAX).is_err());
    }
}
