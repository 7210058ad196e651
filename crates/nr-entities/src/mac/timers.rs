//! Slot-ticked timers. Every MAC timer counts slots and is advanced exactly once per
//! UL slot indication, so expiry never needs external cancellation.

use nr_core::slot_time::slots_per_subframe;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NrTimer {
    duration: u32,
    counter: u32,
    active: bool,
}

impl NrTimer {
    pub fn new(duration_slots: u32) -> Self {
        Self { duration: duration_slots, counter: 0, active: false }
    }

    pub fn from_ms(ms: u32, mu: u8) -> Self {
        Self::new(ms * slots_per_subframe(mu) as u32)
    }

    /// Same as from_ms, for the timers configured in subframes
    pub fn from_subframes(sf: u32, mu: u8) -> Self {
        Self::from_ms(sf, mu)
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// (Re)starts the timer. A zero-length timer never runs.
    pub fn start(&mut self) {
        self.counter = 0;
        self.active = self.duration > 0;
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.counter = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Slots since the last start
    pub fn elapsed(&self) -> u32 {
        self.counter
    }

    /// Advances by one slot. Returns true in the slot the timer expires.
    pub fn tick(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.counter += 1;
        if self.counter >= self.duration {
            self.active = false;
            return true;
        }
        false
    }
}

/// Free-running slot counter, used to measure time between LCP token refills
#[derive(Debug, Clone, Copy, Default)]
pub struct ElapsedCounter {
    slots: u32,
}

impl ElapsedCounter {
    pub fn tick(&mut self) {
        self.slots = self.slots.saturating_add(1);
    }

    /// Returns the slots counted since the last take and restarts the count
    pub fn take(&mut self) -> u32 {
        std::mem::take(&mut self.slots)
    }
}
