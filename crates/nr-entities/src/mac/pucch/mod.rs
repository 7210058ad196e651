//! PUCCH scheduling for one UL slot.
//!
//! SR, periodic CSI and HARQ-ACK are first gathered as independent candidates, each on its
//! own resource. Overlapping candidates are then multiplexed until at most one per symbol
//! range remains. A survivor that overlaps a PUSCH of the same slot may be carried on that
//! PUSCH instead, otherwise it becomes a PUCCH PDU.

pub mod mux;
pub mod resource;

use nr_config::{CfgCsiReport, PucchFormat, UeMacConfig};
use nr_core::{Rnti, SlotTime};
use nr_saps::phy_mac::{PucchPdu, PuschPdu, UlConfigPdu};

use crate::mac::harq::AckCodebook;
use crate::mac::power::PowerControl;

pub use mux::{UciCandidate, UciResource, multiplex};

/// Whether `time` is a reporting slot of the periodic CSI report
pub fn is_csi_occasion(report: &CfgCsiReport, time: SlotTime) -> bool {
    let abs = time.frame as i64 * time.slots_per_frame() as i64 + time.slot as i64;
    (abs - report.offset as i64).rem_euclid(report.period as i64) == 0
}

/// UCI gathered for one UL slot
#[derive(Debug, Default)]
pub struct SlotUci {
    /// (PUCCH resource id, positive) per SR occasion in the slot
    pub sr: Vec<(u8, bool)>,
    /// (PUCCH resource id, bits, payload) per CSI report due in the slot
    pub csi: Vec<(u8, u16, u64)>,
    pub harq: Option<AckCodebook>,
}

/// Turns the gathered UCI into candidates on their own resources. SR and CSI are only sent
/// once connected; before that the HARQ-ACK goes on the common resource.
pub fn collect_candidates(cfg: &UeMacConfig, uci: &SlotUci, connected: bool, time: SlotTime) -> Vec<UciCandidate> {
    let pucch = &cfg.pucch;
    let mut out = Vec::with_capacity(3);

    if connected {
        for (res_id, positive) in &uci.sr {
            match pucch.resource(*res_id) {
                Some(r) => out.push(UciCandidate::sr(r.clone(), *positive)),
                None => tracing::error!(ts = %time, "SR on unknown PUCCH resource {}", res_id),
            }
        }
        for (res_id, bits, payload) in &uci.csi {
            match pucch.resource(*res_id) {
                Some(r) => out.push(UciCandidate::csi(r.clone(), *bits, *payload)),
                None => tracing::error!(ts = %time, "CSI on unknown PUCCH resource {}", res_id),
            }
        }
    }

    if let Some(ack) = &uci.harq {
        if let Some(res) = harq_resource(cfg, ack, connected, time) {
            out.push(UciCandidate::harq(res, ack.n_harq, ack.payload));
        }
    }
    out
}

fn harq_resource(cfg: &UeMacConfig, ack: &AckCodebook, connected: bool, time: SlotTime) -> Option<UciResource> {
    let pucch = &cfg.pucch;
    if connected && pucch.has_dedicated_sets() {
        let res = resource::harq_resource(pucch, ack.n_harq as u16, ack.pri, ack.n_cce, ack.n_cce_total);
        if res.is_none() {
            tracing::error!(ts = %time, "no PUCCH resource for {} HARQ-ACK bits with PRI {}", ack.n_harq, ack.pri);
        }
        return res.cloned().map(UciResource::Dedicated);
    }
    let Some(r_pucch) = resource::initial_resource_index(ack.n_cce, ack.n_cce_total, ack.pri) else {
        tracing::error!(ts = %time, "no common PUCCH resource for n_cce {}/{} PRI {}", ack.n_cce, ack.n_cce_total, ack.pri);
        return None;
    };
    let common_index = pucch.common_resource_index;
    Some(UciResource::Initial { row: resource::initial_pucch(common_index), common_index, r_pucch })
}

/// beta_offset index for HARQ-ACK on PUSCH by ACK bit count, TS 38.213 9.3
fn beta_offset_harq_ack(cfg: &UeMacConfig, n_harq: u8) -> u8 {
    let idx = match n_harq {
        0..=2 => 0,
        3..=11 => 1,
        _ => 2,
    };
    cfg.pusch.beta_offset_ack_index[idx]
}

/// Carries the HARQ-ACK of `cand` on an overlapping PUSCH. Returns true if the PUCCH is
/// no longer needed.
pub fn uci_on_pusch(cfg: &UeMacConfig, cand: &UciCandidate, ul: &mut [UlConfigPdu], time: SlotTime) -> bool {
    let start = cand.resource.start_symbol();
    let end = start + cand.resource.nr_symbols();
    let Some(pusch) = ul.iter_mut().find_map(|pdu| match pdu {
        UlConfigPdu::Pusch(p) if start < p.end_symbol() && end > p.start_symbol => Some(p),
        _ => None,
    }) else {
        return false;
    };
    mux_into_pusch(cfg, cand, pusch, time)
}

fn mux_into_pusch(cfg: &UeMacConfig, cand: &UciCandidate, pusch: &mut PuschPdu, time: SlotTime) -> bool {
    if !pusch.ulsch_present && cand.n_sr > 0 && cand.sr_payload > 0 {
        // Positive SR cannot ride on a PUSCH without UL-SCH
        return false;
    }
    if cand.n_harq == 0 {
        return false;
    }
    pusch.uci.harq_ack_bits = cand.n_harq;
    pusch.uci.harq_payload = cand.ack_payload;
    pusch.uci.beta_offset_harq_ack = beta_offset_harq_ack(cfg, cand.n_harq);
    if cand.n_csi > 0 {
        tracing::debug!(ts = %time, "periodic CSI dropped, HARQ-ACK moved onto PUSCH");
    }
    tracing::debug!(ts = %time, "{} HARQ-ACK bits multiplexed on PUSCH harq pid {}", cand.n_harq, pusch.harq_pid);
    true
}

/// PUCCH PDU for a multiplexed candidate
pub fn build_pucch_pdu(cfg: &UeMacConfig, rnti: Rnti, cand: &UciCandidate, power: &PowerControl) -> PucchPdu {
    let carrier = &cfg.carrier;
    let format = cand.resource.format();
    let (prb_start, second_hop_prb, prb_size, initial_cyclic_shift, time_domain_occ) = match &cand.resource {
        UciResource::Dedicated(r) => {
            let prb_size = match r.format {
                PucchFormat::F2 | PucchFormat::F3 => r.nr_prbs,
                _ => 1,
            };
            (r.start_prb, r.second_hop_prb, prb_size, r.initial_cyclic_shift, r.time_domain_occ)
        }
        UciResource::Initial { row, common_index, r_pucch } => {
            let (first, second, cs) = resource::initial_prbs(row, *common_index, *r_pucch, carrier.ul_bwp_size);
            (first, Some(second), 1, cs, 0)
        }
    };

    let m_cs = if format == PucchFormat::F0 {
        resource::f0_cyclic_shift(cand.n_harq, cand.ack_payload, cand.n_sr, cand.sr_payload)
    } else {
        0
    };
    let payload = if format.is_short_payload() { cand.ack_payload } else { cand.long_payload() };

    PucchPdu {
        rnti,
        format,
        bwp_start: carrier.ul_bwp_start,
        bwp_size: carrier.ul_bwp_size,
        prb_start,
        prb_size,
        second_hop_prb,
        start_symbol: cand.resource.start_symbol(),
        nr_symbols: cand.resource.nr_symbols(),
        initial_cyclic_shift,
        time_domain_occ,
        m_cs,
        n_harq: cand.n_harq,
        n_sr: cand.n_sr,
        n_csi: cand.n_csi,
        payload,
        sr_flag: cand.n_sr > 0 && cand.sr_payload > 0,
        hopping_id: cfg.pucch.hopping_id.unwrap_or(carrier.phys_cell_id),
        data_scrambling_id: carrier.phys_cell_id,
        tx_power: power.pucch_power(cfg.pucch.p0_nominal, carrier.numerology, prb_size as u16),
    }
}

/// Runs the whole PUCCH decision for one slot. PUSCHs already queued for the slot are passed
/// in `ul` and may pick up the HARQ-ACK. Returns the PUCCH PDUs to queue.
pub fn schedule_pucch(
    cfg: &UeMacConfig,
    rnti: Rnti,
    uci: &SlotUci,
    connected: bool,
    ul: &mut [UlConfigPdu],
    power: &PowerControl,
    time: SlotTime,
) -> Vec<PucchPdu> {
    let candidates = collect_candidates(cfg, uci, connected, time);
    if candidates.is_empty() {
        return Vec::new();
    }
    if candidates.len() == 1 && candidates[0].is_negative_sr_only() {
        return Vec::new();
    }

    let merged = multiplex(candidates, cfg.pucch.simultaneous_harq_ack_csi);
    let mut out = Vec::with_capacity(merged.len());
    for cand in merged {
        if cand.is_empty() || cand.is_negative_sr_only() {
            continue;
        }
        if uci_on_pusch(cfg, &cand, ul, time) {
            continue;
        }
        let pdu = build_pucch_pdu(cfg, rnti, &cand, power);
        tracing::debug!(
            ts = %time,
            "PUCCH {:?} prb {} symbols {}+{} harq {} sr {} csi {} m_cs {}",
            pdu.format,
            pdu.prb_start,
            pdu.start_symbol,
            pdu.nr_symbols,
            pdu.n_harq,
            pdu.n_sr,
            pdu.n_csi,
            pdu.m_cs
        );
        out.push(pdu);
    }
    out
}
