//! HARQ process arenas and the type-2 HARQ-ACK codebook (TS 38.213 9.1.3).

use nr_core::SlotTime;

pub const NR_MAX_HARQ_PROCESSES: usize = 16;

/// Where and when the ACK for a DL assignment goes, as signalled by its DCI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackSchedule {
    pub pri: u8,
    pub delta_pucch: i8,
    /// Slots from the PDSCH slot to the PUCCH slot, koffset included
    pub feedback_slots: u16,
    /// Counter DAI field, 0..=3
    pub dai: u8,
    pub n_cce: u16,
    pub n_cce_total: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DlHarqProcess {
    pub active: bool,
    pub last_ndi: Option<u8>,
    /// Code rate x 10240 and TBS (bytes) of the TB currently in the process
    pub r: u16,
    pub tbs: u32,
    pub feedback_time: SlotTime,
    pub pri: u8,
    pub n_cce: u16,
    pub n_cce_total: u16,
    /// Counter DAI extended past the modulo-4 wrap, 1-based
    pub dai_cumul: u8,
    pub delta_pucch: i8,
    /// Decode result per transport block, None until the PHY reports it
    ack: [Option<bool>; 2],
}

/// ACK bits due in one slot, ready to be placed on a PUCCH resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckCodebook {
    pub n_harq: u8,
    /// Bit-reversed o-ACK sequence, first codebook bit in the LSB
    pub payload: u64,
    pub pri: u8,
    pub n_cce: u16,
    pub n_cce_total: u16,
    pub delta_pucch: i8,
}

pub struct DlHarq {
    procs: [DlHarqProcess; NR_MAX_HARQ_PROCESSES],
}

impl Default for DlHarq {
    fn default() -> Self {
        Self::new()
    }
}

impl DlHarq {
    pub fn new() -> Self {
        Self { procs: [DlHarqProcess::default(); NR_MAX_HARQ_PROCESSES] }
    }

    pub fn get(&self, pid: u8) -> &DlHarqProcess {
        &self.procs[pid as usize]
    }

    /// Stores the NDI and the size of the TB now held by `pid`. `ndi` is None for
    /// broadcast assignments, which do not toggle.
    pub fn update_tb(&mut self, pid: u8, ndi: Option<u8>, r: u16, tbs: u32) {
        let p = &mut self.procs[pid as usize];
        if ndi.is_some() {
            p.last_ndi = ndi;
        }
        p.r = r;
        p.tbs = tbs;
    }

    /// Arms `pid` for feedback and works out its cumulative DAI among the processes
    /// reporting in the same slot.
    pub fn set_status(&mut self, pid: u8, time: SlotTime, fb: FeedbackSchedule) {
        let feedback_time = time.add_slots(fb.feedback_slots as i32);

        // The counter DAI is modulo 4 but a slot may carry more than four ACKs.
        // A DAI at or below the highest one already seen for the target slot means
        // the counter wrapped. The running maximum compares against dai_cumul but
        // records dai_cumul - 1; this is kept exactly as observed on air.
        let mut highest_dai: i32 = -1;
        for (i, other) in self.procs.iter().enumerate() {
            if i == pid as usize {
                continue;
            }
            if other.active && other.feedback_time == feedback_time && other.dai_cumul as i32 > highest_dai {
                highest_dai = other.dai_cumul as i32 - 1;
            }
        }
        let mut dai_cumul = fb.dai as i32 + 1;
        if (fb.dai as i32) <= highest_dai {
            let wraps = (highest_dai + 1) / 4;
            dai_cumul += wraps * 4;
        }

        let p = &mut self.procs[pid as usize];
        p.active = true;
        p.ack = [None, None];
        p.pri = fb.pri;
        p.n_cce = fb.n_cce;
        p.n_cce_total = fb.n_cce_total;
        p.delta_pucch = fb.delta_pucch;
        p.feedback_time = feedback_time;
        p.dai_cumul = dai_cumul as u8;
        tracing::debug!(
            ts = %time,
            "harq pid {} armed, feedback at {} (k1 {}) dai_cumul {}",
            pid,
            feedback_time,
            fb.feedback_slots,
            dai_cumul
        );
    }

    /// Records the PHY decode result for one transport block of `pid`
    pub fn set_ack(&mut self, pid: u8, tb: u8, ack: bool) {
        let Some(p) = self.procs.get_mut(pid as usize) else {
            tracing::warn!("decode result for unknown harq pid {}", pid);
            return;
        };
        if !p.active {
            // Broadcast and RAR PDSCH carry no feedback
            tracing::trace!("decode result for inactive harq pid {}", pid);
            return;
        }
        p.ack[(tb & 1) as usize] = Some(ack);
    }

    /// Builds the ACK codebook for `time` and releases every process reported in it.
    /// A second call for the same slot finds nothing. A process not yet decoded is
    /// reported as NACK and released as well.
    pub fn get_downlink_ack(&mut self, time: SlotTime, two_codewords: bool) -> Option<AckCodebook> {
        let mut ack_data = [[false; NR_MAX_HARQ_PROCESSES]; 2];
        let mut dai = [0u8; NR_MAX_HARQ_PROCESSES];
        let mut num_feedback = 0usize;
        let mut dai_max = 0usize;
        let mut first: Option<DlHarqProcess> = None;

        for (pid, p) in self.procs.iter_mut().enumerate() {
            if !p.active || p.feedback_time != time {
                continue;
            }
            p.active = false;

            if let Some(f) = &first {
                if f.pri != p.pri {
                    tracing::error!(
                        ts = %time,
                        "harq pid {} PUCCH resource indicator {} does not match {} set before, possibly a false DCI",
                        pid,
                        p.pri,
                        f.pri
                    );
                    continue;
                }
            }
            if p.dai_cumul == 0 || p.dai_cumul as usize > NR_MAX_HARQ_PROCESSES {
                tracing::error!(ts = %time, "harq pid {} has invalid DAI {}", pid, p.dai_cumul);
                return None;
            }
            let idx = p.dai_cumul as usize - 1;
            dai_max = dai_max.max(p.dai_cumul as usize);

            match p.ack[0] {
                Some(ack) => {
                    ack_data[0][idx] = ack;
                    ack_data[1][idx] = p.ack[1].unwrap_or(false);
                }
                None => {
                    tracing::error!(ts = %time, "ACK reporting for harq pid {} before decoding completed, sending NACK", pid);
                }
            }
            p.ack = [None, None];
            dai[idx] = (idx % 4) as u8 + 1;
            num_feedback += 1;
            if first.is_none() {
                first = Some(*p);
            }
        }

        let first = first?;

        // Missed assignments are reported as NACK
        for (i, d) in dai.iter_mut().enumerate().take(dai_max) {
            if *d == 0 {
                *d = (i % 4) as u8 + 1;
                ack_data[0][i] = false;
                ack_data[1][i] = false;
                num_feedback += 1;
            }
        }

        let mut j = 0u32;
        let mut v_temp = 0u32;
        let mut o_ack = 0u64;
        for m in 0..dai_max {
            let v = dai[m] as u32;
            if v <= v_temp {
                j += 1;
            }
            v_temp = v;
            if two_codewords {
                let bit = 8 * j + 2 * (v - 1);
                o_ack |= (ack_data[0][m] as u64) << bit;
                o_ack |= (ack_data[1][m] as u64) << (bit + 1);
            } else {
                o_ack |= (ack_data[0][m] as u64) << (4 * j + v - 1);
            }
        }
        let (o_ack_bits, expected) = if two_codewords {
            (2 * (4 * j + v_temp) as usize, 2 * num_feedback)
        } else {
            ((4 * j + v_temp) as usize, num_feedback)
        };
        if o_ack_bits != expected || o_ack_bits > 64 {
            tracing::error!(ts = %time, "ACK codebook size {} does not match {} feedback bits", o_ack_bits, expected);
            return None;
        }

        Some(AckCodebook {
            n_harq: o_ack_bits as u8,
            payload: reverse_bits(o_ack, o_ack_bits as u32),
            pri: first.pri,
            n_cce: first.n_cce,
            n_cce_total: first.n_cce_total,
            delta_pucch: first.delta_pucch,
        })
    }

    pub fn reset(&mut self) {
        self.procs = [DlHarqProcess::default(); NR_MAX_HARQ_PROCESSES];
    }
}

/// Reverses the order of the low `n` bits of `v`
pub fn reverse_bits(v: u64, n: u32) -> u64 {
    if n == 0 {
        return 0;
    }
    v.reverse_bits() >> (64 - n)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UlHarqProcess {
    pub last_ndi: Option<u8>,
    pub r: u16,
    /// TBS in bytes
    pub tbs: u32,
    /// TPC of the DCI that scheduled the current transmission
    pub delta_pusch: i8,
}

pub struct UlHarq {
    procs: [UlHarqProcess; NR_MAX_HARQ_PROCESSES],
}

impl Default for UlHarq {
    fn default() -> Self {
        Self::new()
    }
}

impl UlHarq {
    pub fn new() -> Self {
        Self { procs: [UlHarqProcess::default(); NR_MAX_HARQ_PROCESSES] }
    }

    pub fn get(&self, pid: u8) -> &UlHarqProcess {
        &self.procs[pid as usize]
    }

    pub fn set(&mut self, pid: u8, proc: UlHarqProcess) {
        self.procs[pid as usize] = proc;
    }

    pub fn reset(&mut self) {
        self.procs = [UlHarqProcess::default(); NR_MAX_HARQ_PROCESSES];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nr_core::debug;

    fn fb(pri: u8, feedback_slots: u16, dai: u8) -> FeedbackSchedule {
        FeedbackSchedule { pri, delta_pucch: 0, feedback_slots, dai, n_cce: 0, n_cce_total: 8 }
    }

    #[test]
    fn test_single_process_feedback() {
        debug::setup_logging_verbose();
        let mut harq = DlHarq::new();
        harq.set_status(3, SlotTime::new(10, 5, 1), fb(0, 2, 0));
        assert_eq!(harq.get(3).feedback_time, SlotTime::new(10, 7, 1));
        assert_eq!(harq.get(3).dai_cumul, 1);
        harq.set_ack(3, 0, true);

        let cb = harq.get_downlink_ack(SlotTime::new(10, 7, 1), false).unwrap();
        assert_eq!(cb.n_harq, 1);
        assert_eq!(cb.payload, 1);
        assert!(!harq.get(3).active);
        assert_eq!(harq.get_downlink_ack(SlotTime::new(10, 7, 1), false), None);
    }

    #[test]
    fn test_feedback_crosses_frame() {
        debug::setup_logging_verbose();
        let mut harq = DlHarq::new();
        harq.set_status(0, SlotTime::new(1023, 18, 1), fb(0, 4, 0));
        assert_eq!(harq.get(0).feedback_time, SlotTime::new(0, 2, 1));
    }

    #[test]
    fn test_codebook_order_follows_dai() {
        debug::setup_logging_verbose();
        let mut harq = DlHarq::new();
        // Three assignments for slot 9, scheduled out of pid order
        harq.set_status(5, SlotTime::new(0, 4, 1), fb(1, 5, 0));
        harq.set_status(2, SlotTime::new(0, 5, 1), fb(1, 4, 1));
        harq.set_status(7, SlotTime::new(0, 6, 1), fb(1, 3, 2));
        harq.set_ack(5, 0, true);
        harq.set_ack(2, 0, false);
        harq.set_ack(7, 0, true);

        let cb = harq.get_downlink_ack(SlotTime::new(0, 9, 1), false).unwrap();
        assert_eq!(cb.n_harq, 3);
        // o-ACK = 0b101 (dai 1 in bit 0), reversed over 3 bits is still 0b101
        assert_eq!(cb.payload, 0b101);
        assert_eq!(cb.pri, 1);
    }

    #[test]
    fn test_missed_dai_padded_with_nack() {
        debug::setup_logging_verbose();
        let mut harq = DlHarq::new();
        harq.set_status(0, SlotTime::new(0, 4, 1), fb(0, 5, 0));
        // DAI 1 never decoded, this one carries DAI 2
        harq.set_status(1, SlotTime::new(0, 6, 1), fb(0, 3, 2));
        harq.set_ack(0, 0, true);
        harq.set_ack(1, 0, true);

        let cb = harq.get_downlink_ack(SlotTime::new(0, 9, 1), false).unwrap();
        assert_eq!(cb.n_harq, 3);
        // o-ACK bits: [ack, nack, ack] -> 0b101
        assert_eq!(cb.payload, 0b101);
    }

    #[test]
    fn test_dai_wraparound_five_processes() {
        debug::setup_logging_verbose();
        let mut harq = DlHarq::new();
        let target = SlotTime::new(0, 19, 1);
        for pid in 0..5u8 {
            let t = SlotTime::new(0, 10 + pid as u16, 1);
            harq.set_status(pid, t, fb(0, 9 - pid as u16, pid % 4));
            harq.set_ack(pid, 0, true);
        }
        assert_eq!(harq.get(4).dai_cumul, 5);
        let cb = harq.get_downlink_ack(target, false).unwrap();
        assert_eq!(cb.n_harq, 5);
        assert_eq!(cb.payload, 0b11111);
    }

    #[test]
    fn test_conflicting_pri_first_seen_wins() {
        debug::setup_logging_verbose();
        let mut harq = DlHarq::new();
        harq.set_status(0, SlotTime::new(0, 4, 1), fb(2, 5, 0));
        harq.set_status(1, SlotTime::new(0, 5, 1), fb(6, 4, 1));
        harq.set_ack(0, 0, true);
        harq.set_ack(1, 0, true);

        let cb = harq.get_downlink_ack(SlotTime::new(0, 9, 1), false).unwrap();
        assert_eq!(cb.pri, 2);
        // The conflicting process is left out of the codebook but still released
        assert_eq!(cb.n_harq, 1);
        assert_eq!(cb.payload, 1);
        assert!(!harq.get(1).active);
    }

    #[test]
    fn test_ack_before_decode_is_nack() {
        debug::setup_logging_verbose();
        let mut harq = DlHarq::new();
        harq.set_status(4, SlotTime::new(3, 0, 1), fb(0, 2, 0));
        let cb = harq.get_downlink_ack(SlotTime::new(3, 2, 1), false).unwrap();
        assert_eq!(cb.n_harq, 1);
        assert_eq!(cb.payload, 0);
        assert!(!harq.get(4).active);
        assert_eq!(harq.get_downlink_ack(SlotTime::new(3, 2, 1), false), None);
    }

    #[test]
    fn test_two_codewords() {
        debug::setup_logging_verbose();
        let mut harq = DlHarq::new();
        harq.set_status(0, SlotTime::new(0, 0, 1), fb(0, 4, 0));
        harq.set_ack(0, 0, true);
        harq.set_ack(0, 1, false);
        let cb = harq.get_downlink_ack(SlotTime::new(0, 4, 1), true).unwrap();
        assert_eq!(cb.n_harq, 2);
        // o-ACK = [tb0 ack, tb1 nack] -> reversed over 2 bits
        assert_eq!(cb.payload, 0b10);
    }

    #[test]
    fn test_reverse_bits() {
        assert_eq!(reverse_bits(0b0011, 4), 0b1100);
        assert_eq!(reverse_bits(0b1, 1), 0b1);
        assert_eq!(reverse_bits(0, 0), 0);
    }
}
