use core::fmt;

/// System frame numbers wrap at 1024
pub const NR_MAX_FRAME: u16 = 1024;

/// Highest supported numerology (240 kHz SCS)
pub const NR_MAX_NUMEROLOGY: u8 = 4;

/// Number of slots in a 10 ms frame for numerology `mu`
#[inline(always)]
pub const fn slots_per_frame(mu: u8) -> u16 {
    10 << mu
}

/// Number of slots in a 1 ms subframe for numerology `mu`
#[inline(always)]
pub const fn slots_per_subframe(mu: u8) -> u16 {
    1 << mu
}

/// A (frame, slot) pair at a fixed numerology.
/// All arithmetic wraps at frame 1024.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SlotTime {
    /// System frame number, 0..1023
    pub frame: u16,
    /// Slot within the frame, 0..slots_per_frame(mu)
    pub slot: u16,
    /// Numerology, 0..=4
    pub mu: u8,
}

impl SlotTime {
    pub fn new(frame: u16, slot: u16, mu: u8) -> Self {
        assert!(mu <= NR_MAX_NUMEROLOGY, "numerology {} out of range", mu);
        assert!(frame < NR_MAX_FRAME, "frame {} out of range", frame);
        assert!(slot < slots_per_frame(mu), "slot {} out of range for mu {}", slot, mu);
        SlotTime { frame, slot, mu }
    }

    #[inline(always)]
    pub fn slots_per_frame(&self) -> u16 {
        slots_per_frame(self.mu)
    }

    /// Number of distinct slot times before wrap-around at this numerology
    #[inline(always)]
    pub fn wrap(&self) -> i32 {
        NR_MAX_FRAME as i32 * self.slots_per_frame() as i32
    }

    pub fn to_int(self) -> i32 {
        self.frame as i32 * self.slots_per_frame() as i32 + self.slot as i32
    }

    /// Converts an absolute slot count into a SlotTime, wrapping at frame 1024
    pub fn from_int(mu: u8, time: i32) -> Self {
        let spf = slots_per_frame(mu) as i32;
        let wrapped = time.rem_euclid(NR_MAX_FRAME as i32 * spf);
        SlotTime {
            frame: (wrapped / spf) as u16,
            slot: (wrapped % spf) as u16,
            mu,
        }
    }

    pub fn add_slots(self, num_slots: i32) -> Self {
        SlotTime::from_int(self.mu, self.to_int() + num_slots)
    }

    /// Signed distance self - other in slots, taking the shortest way around the wrap
    pub fn diff(self, other: SlotTime) -> i32 {
        assert_eq!(self.mu, other.mu, "diff between different numerologies");
        let wrap = self.wrap();
        let mut d = self.to_int() - other.to_int();
        while d < -wrap / 2 {
            d += wrap;
        }
        while d >= wrap / 2 {
            d -= wrap;
        }
        d
    }

    #[inline(always)]
    pub fn is(&self, frame: u16, slot: u16) -> bool {
        self.frame == frame && self.slot == slot
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4}.{:02}", self.frame, self.slot)
    }
}

impl fmt::Debug for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4}.{:02}", self.frame, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_slots_crosses_frame() {
        let t = SlotTime::new(10, 19, 1);
        assert_eq!(t.add_slots(1), SlotTime::new(11, 0, 1));
        assert_eq!(t.add_slots(21), SlotTime::new(12, 0, 1));
        assert_eq!(SlotTime::new(10, 5, 1).add_slots(2), SlotTime::new(10, 7, 1));
    }

    #[test]
    fn test_frame_wrap() {
        let last = SlotTime::new(1023, 9, 0);
        let first = last.add_slots(1);
        assert_eq!(first, SlotTime::new(0, 0, 0));
        assert_eq!(first.diff(last), 1);
        assert_eq!(last.diff(first), -1);
        assert_eq!(SlotTime::new(0, 0, 0).add_slots(-1), last);
    }

    #[test]
    fn test_diff_roundtrip_over_many_increments() {
        let start = SlotTime::new(0, 0, 2);
        let mut t = start;
        for _ in 0..5000 {
            let next = t.add_slots(37);
            assert_eq!(next.diff(t), 37);
            t = next;
        }
        for _ in 0..5000 {
            t = t.add_slots(-37);
        }
        assert_eq!(t, start);
    }
}
