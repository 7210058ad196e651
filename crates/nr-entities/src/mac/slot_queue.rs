//! Bounded per-slot configuration queues.
//!
//! One queue per slot index of the frame, each behind its own mutex so that the DL and UL
//! scheduling paths can fill different (or the same) future slots without a global lock.
//! Each queue is stamped with the frame/slot it currently holds; locking it for any other
//! time discards the stale contents first.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use nr_core::SlotTime;

use super::errors::MacError;

struct SlotQueue<T> {
    time: Option<SlotTime>,
    pdus: Vec<T>,
}

pub struct SlotQueues<T> {
    name: &'static str,
    queues: Vec<Mutex<SlotQueue<T>>>,
    capacity: usize,
}

impl<T> SlotQueues<T> {
    pub fn new(name: &'static str, slots_per_frame: u16, capacity: usize) -> Self {
        assert!(capacity > 0, "slot queue capacity must be nonzero");
        let queues = (0..slots_per_frame)
            .map(|_| Mutex::new(SlotQueue { time: None, pdus: Vec::with_capacity(capacity) }))
            .collect();
        Self { name, queues, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Locks the queue for `time`. Entries left over from an earlier frame are dropped
    /// and the queue is restamped.
    pub fn lock(&self, time: SlotTime) -> SlotQueueGuard<'_, T> {
        let mutex = &self.queues[time.slot as usize % self.queues.len()];
        // A panic while holding the lock leaves nothing half-written that matters here
        let mut guard = mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.time != Some(time) {
            if !guard.pdus.is_empty() {
                tracing::error!(
                    "{} queue: {} stale entries for {:?} discarded at {}",
                    self.name,
                    guard.pdus.len(),
                    guard.time,
                    time
                );
                guard.pdus.clear();
            }
            guard.time = Some(time);
        }
        SlotQueueGuard { guard, name: self.name, capacity: self.capacity, time }
    }

    /// Appends one PDU to the queue of `time`
    pub fn push(&self, time: SlotTime, pdu: T) -> Result<(), MacError> {
        self.lock(time).push(pdu)
    }

    /// Removes and returns everything queued for `time`
    pub fn take(&self, time: SlotTime) -> Vec<T> {
        self.lock(time).take()
    }

    /// Number of entries queued for `time`
    pub fn len(&self, time: SlotTime) -> usize {
        self.lock(time).len()
    }

    pub fn is_empty(&self, time: SlotTime) -> bool {
        self.len(time) == 0
    }

    pub fn clear_all(&self) {
        for q in &self.queues {
            let mut guard = q.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.pdus.clear();
            guard.time = None;
        }
    }
}

/// Exclusive access to one slot's queue. Derefs to the queued entries, so the holder can
/// walk and edit them in place and append or remove while keeping the lock.
pub struct SlotQueueGuard<'a, T> {
    guard: MutexGuard<'a, SlotQueue<T>>,
    name: &'static str,
    capacity: usize,
    time: SlotTime,
}

impl<T> SlotQueueGuard<'_, T> {
    pub fn time(&self) -> SlotTime {
        self.time
    }

    /// Appends `pdu`, or drops it if the queue is at capacity
    pub fn push(&mut self, pdu: T) -> Result<(), MacError> {
        if self.guard.pdus.len() >= self.capacity {
            tracing::error!("{} queue for {} is full ({} entries), dropping new PDU", self.name, self.time, self.capacity);
            return Err(MacError::QueueFull { time: self.time });
        }
        self.guard.pdus.push(pdu);
        Ok(())
    }

    /// Returns the entry just pushed, used to back out of a PDU that failed to configure
    pub fn remove_last(&mut self) -> Option<T> {
        self.guard.pdus.pop()
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.guard.pdus.last_mut()
    }

    pub fn take(mut self) -> Vec<T> {
        std::mem::take(&mut self.guard.pdus)
    }
}

impl<T> Deref for SlotQueueGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.guard.pdus
    }
}

impl<T> DerefMut for SlotQueueGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.guard.pdus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_core::debug;

    fn t(frame: u16, slot: u16) -> SlotTime {
        SlotTime::new(frame, slot, 1)
    }

    #[test]
    fn test_capacity_drops_new_pdu() {
        debug::setup_logging_verbose();
        let q = SlotQueues::new("test", 20, 2);
        q.push(t(1, 3), 1).unwrap();
        q.push(t(1, 3), 2).unwrap();
        assert_eq!(q.push(t(1, 3), 3), Err(MacError::QueueFull { time: t(1, 3) }));
        assert_eq!(q.take(t(1, 3)), vec![1, 2]);
    }

    #[test]
    fn test_stale_entries_discarded() {
        debug::setup_logging_verbose();
        let q = SlotQueues::new("test", 20, 4);
        q.push(t(1, 3), 10).unwrap();
        // Same slot index one frame later: old contents are never delivered
        q.push(t(2, 3), 20).unwrap();
        assert_eq!(q.take(t(2, 3)), vec![20]);
        assert!(q.take(t(1, 3)).is_empty());
    }

    #[test]
    fn test_guard_edit_in_place() {
        debug::setup_logging_verbose();
        let q = SlotQueues::new("test", 20, 4);
        {
            let mut g = q.lock(t(0, 5));
            g.push(1).unwrap();
            g.push(2).unwrap();
            for v in g.iter_mut() {
                *v *= 10;
            }
            assert_eq!(g.remove_last(), Some(20));
        }
        assert_eq!(q.len(t(0, 5)), 1);
        assert_eq!(q.take(t(0, 5)), vec![10]);
    }

    #[test]
    fn test_parallel_writers_same_slot() {
        debug::setup_logging_verbose();
        let q = SlotQueues::new("test", 20, 64);
        std::thread::scope(|s| {
            for w in 0..4 {
                let q = &q;
                s.spawn(move || {
                    for i in 0..8 {
                        q.push(t(7, 11), w * 100 + i).unwrap();
                    }
                });
            }
        });
        let mut all = q.take(t(7, 11));
        all.sort();
        assert_eq!(all.len(), 32);
        assert_eq!(all[0], 0);
        assert_eq!(all[31], 307);
    }
}
