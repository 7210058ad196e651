//! Boundary to the RLC layer above the MAC

use std::collections::{HashMap, VecDeque};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use nr_core::Lcid;

/// What the MAC needs from RLC: UL buffer occupancy, UL data on demand and a sink for DL SDUs
pub trait RlcInterface: Send {
    /// Bytes waiting for transmission on `lcid`
    fn buffer_status(&mut self, lcid: Lcid) -> u32;

    /// Returns at most `max_bytes` of UL data for `lcid`, empty if there is nothing to send
    fn pull_sdu(&mut self, lcid: Lcid, max_bytes: usize) -> Vec<u8>;

    fn deliver_sdu(&mut self, lcid: Lcid, sdu: &[u8]);
}

/// Application side of a LoopbackRlc
#[derive(Clone)]
pub struct RlcHandle {
    pub ul_tx: Sender<(Lcid, Vec<u8>)>,
    pub dl_rx: Receiver<(Lcid, Vec<u8>)>,
}

impl RlcHandle {
    /// Queues `data` for UL transmission on `lcid`
    pub fn send(&self, lcid: Lcid, data: Vec<u8>) {
        // Receiver gone means the MAC is shutting down
        let _ = self.ul_tx.send((lcid, data));
    }

    /// Everything delivered in DL so far
    pub fn received(&self) -> Vec<(Lcid, Vec<u8>)> {
        self.dl_rx.try_iter().collect()
    }
}

/// In-memory RLC. UL data enters through the handle's channel and is segmented on pull,
/// DL SDUs are handed back through the other channel.
pub struct LoopbackRlc {
    ul_rx: Receiver<(Lcid, Vec<u8>)>,
    dl_tx: Sender<(Lcid, Vec<u8>)>,
    queues: HashMap<Lcid, VecDeque<Vec<u8>>>,
}

impl LoopbackRlc {
    pub fn new() -> (Self, RlcHandle) {
        let (ul_tx, ul_rx) = unbounded();
        let (dl_tx, dl_rx) = unbounded();
        (Self { ul_rx, dl_tx, queues: HashMap::new() }, RlcHandle { ul_tx, dl_rx })
    }

    fn drain_input(&mut self) {
        loop {
            match self.ul_rx.try_recv() {
                Ok((lcid, data)) if !data.is_empty() => self.queues.entry(lcid).or_default().push_back(data),
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl RlcInterface for LoopbackRlc {
    fn buffer_status(&mut self, lcid: Lcid) -> u32 {
        self.drain_input();
        self.queues.get(&lcid).map_or(0, |q| q.iter().map(|s| s.len() as u32).sum())
    }

    fn pull_sdu(&mut self, lcid: Lcid, max_bytes: usize) -> Vec<u8> {
        self.drain_input();
        let Some(queue) = self.queues.get_mut(&lcid) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while out.len() < max_bytes {
            let Some(head) = queue.front_mut() else { break };
            let take = head.len().min(max_bytes - out.len());
            out.extend(head.drain(..take));
            if head.is_empty() {
                queue.pop_front();
            }
        }
        tracing::trace!("rlc lcid {} pulled {} bytes (max {})", lcid, out.len(), max_bytes);
        out
    }

    fn deliver_sdu(&mut self, lcid: Lcid, sdu: &[u8]) {
        tracing::debug!("rlc lcid {} received {} bytes", lcid, sdu.len());
        let _ = self.dl_tx.send((lcid, sdu.to_vec()));
    }
}
