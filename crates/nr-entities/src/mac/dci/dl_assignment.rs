//! PDSCH assignments from DCI 1_0 and 1_1.
//!
//! Interpretation works on a read-only view of the HARQ arena and returns everything that
//! has to change. Nothing is written until the caller has queued the PDSCH, so a DCI that
//! turns out to be bogus halfway through leaves no trace.

use nr_config::McsTable;
use nr_core::RntiType;
use nr_saps::phy_mac::{DmrsInfo, PdschPdu, PdschTb};

use super::tables::{self, TbsParams, TdraRow};
use super::{DciContext, DciField, DciFields, DciKind, DciSizes};
use crate::mac::errors::{check_dci, MacError};
use crate::mac::harq::{DlHarq, FeedbackSchedule};

/// HARQ bookkeeping for a queued PDSCH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlHarqUpdate {
    pub pid: u8,
    pub ndi: u8,
    pub r: u16,
    /// Bytes
    pub tbs: u32,
    pub feedback: FeedbackSchedule,
}

#[derive(Debug, Clone)]
pub struct DlAssignment {
    pub pdsch_time: nr_core::SlotTime,
    pub pdsch: PdschPdu,
    /// None for broadcast assignments
    pub harq: Option<DlHarqUpdate>,
}

struct TbOutcome {
    tb: PdschTb,
    r: u16,
    tbs: u32,
}

/// Resolves MCS, code rate and TBS for one transport block. Retransmissions reuse what the
/// process stored for the initial transmission.
#[allow(clippy::too_many_arguments)]
fn resolve_tb(
    ctx: &DciContext,
    harq: &DlHarq,
    pid: u8,
    mcs_table: McsTable,
    mcs: u8,
    ndi: u8,
    rv: u8,
    mut params: TbsParams,
) -> Result<TbOutcome, MacError> {
    let qm = tables::mcs_qm(mcs_table, mcs);
    let process = harq.get(pid);
    let mut new_data = ctx.is_broadcast() || process.last_ndi != Some(ndi);
    let (mut r, mut tbs) = if new_data { (0, 0) } else { (process.r, process.tbs) };

    let rate = tables::mcs_code_rate(mcs_table, mcs);
    if rate > 0 {
        params.r = rate;
        params.qm = qm;
        let computed = tables::compute_tbs(&params) >> 3;
        if !new_data && computed != tbs {
            tracing::warn!(
                ts = %ctx.time,
                "harq pid {} retransmission TBS {} differs from stored {}, handling as new data",
                pid,
                computed,
                tbs
            );
            new_data = true;
        }
        r = rate;
        tbs = computed;
    }
    check_dci!(tbs > 0, "tbs", tbs);

    Ok(TbOutcome {
        tb: PdschTb { mcs_index: mcs, qam_mod_order: qm, target_code_rate: r, tb_size: tbs, new_data, rv },
        r,
        tbs,
    })
}

fn pdsch_tdra(ctx: &DciContext, index: u8) -> Result<TdraRow, MacError> {
    let list = &ctx.cfg.pdsch.tdra;
    let row = if ctx.rnti_type == RntiType::C && !list.is_empty() {
        list.get(index as usize).map(|t| TdraRow {
            k: t.k0,
            mapping_type_b: t.mapping_type_b,
            start_symbol: t.start_symbol,
            nr_symbols: t.nr_symbols,
        })
    } else {
        tables::pdsch_default_tdra(index)
    };
    row.ok_or(MacError::FalseDci { field: "tdra", value: index as u32 })
}

/// PRI must address a resource of at least one configured set
fn check_pri(ctx: &DciContext, pri: u8) -> Result<(), MacError> {
    let sets = &ctx.cfg.pucch.resource_sets;
    check_dci!(sets.is_empty() || sets.iter().any(|s| (pri as usize) < s.resources.len()), "pucch resource indicator", pri);
    Ok(())
}

/// Builds the feedback schedule and enforces the turnaround floor
fn feedback_schedule(ctx: &DciContext, fields: &DciFields, k1: u16, k0: u8) -> Result<FeedbackSchedule, MacError> {
    let pri = fields.get_u8(DciField::Pri);
    check_pri(ctx, pri)?;
    let tpc = fields.get_u8(DciField::Tpc) & 3;

    let feedback_slots = k1 + ctx.koffset();
    let floor = ctx.cfg.timing.min_rx_to_tx_slots as u16;
    assert!(
        feedback_slots > floor,
        "k1 {} + koffset {} does not exceed the minimum rx-to-tx time of {} slots",
        k1,
        ctx.koffset(),
        floor
    );
    let fb_time = ctx.time.add_slots(k0 as i32 + feedback_slots as i32);
    check_dci!(ctx.cfg.carrier.is_ul_slot(fb_time.slot), "feedback slot", fb_time.slot);

    Ok(FeedbackSchedule {
        pri,
        delta_pucch: tables::PUCCH_TPC_DB[tpc as usize],
        feedback_slots,
        dai: fields.get_u8(DciField::Dai),
        n_cce: ctx.n_cce,
        n_cce_total: ctx.n_cce_total,
    })
}

/// Turns a decoded DCI 1_0 or 1_1 into a PDSCH configuration
pub fn interpret_dl_assignment(
    ctx: &DciContext,
    sizes: &DciSizes,
    fields: &DciFields,
    harq: &DlHarq,
) -> Result<DlAssignment, MacError> {
    let kind = fields.kind;
    assert!(
        matches!(kind, DciKind::Dl10 | DciKind::Dl10Ra | DciKind::Dl10Si | DciKind::Dl11),
        "{:?} is not a DL assignment",
        kind
    );
    let cfg = ctx.cfg;
    let fallback = kind != DciKind::Dl11;

    let n_rb = sizes.n_rb(kind);
    let fdra = fields.get(DciField::Fdra);
    let (rb_start, rb_size) = tables::riv_to_rbs(fdra, n_rb).ok_or(MacError::FalseDci { field: "fdra", value: fdra })?;

    let row = pdsch_tdra(ctx, fields.get_u8(DciField::Tdra))?;
    let pdsch_time = ctx.time.add_slots(row.k as i32);

    let pid = fields.get_u8(DciField::HarqPid);
    check_dci!((pid as usize) < cfg.pdsch.num_harq_processes.max(1) as usize || ctx.is_broadcast(), "harq pid", pid);

    // DM-RS: fallback DCIs use type 1 on port 0
    let (dmrs_type, cdm_groups, ports) = if fallback {
        (1, if row.nr_symbols == 2 { 1 } else { 2 }, 0b1)
    } else if cfg.pdsch.dmrs_type == 1 && cfg.pdsch.dmrs_max_length == 1 {
        let value = fields.get_u8(DciField::AntennaPorts);
        let (cdm, ports) =
            tables::dl_antenna_ports(value).ok_or(MacError::FalseDci { field: "antenna ports", value: value as u32 })?;
        (1, cdm, ports)
    } else {
        nr_core::unimplemented_log!("antenna ports for DM-RS type {} length {}", cfg.pdsch.dmrs_type, cfg.pdsch.dmrs_max_length);
        (cfg.pdsch.dmrs_type, 2, 0b1)
    };
    let add_pos = if ctx.rnti_type == RntiType::C { cfg.pdsch.dmrs_add_pos } else { 2 };
    let dmrs = DmrsInfo {
        config_type: dmrs_type,
        symb_pos: tables::dmrs_symbols(row.mapping_type_b, row.start_symbol, row.nr_symbols, add_pos, false),
        num_cdm_grps_no_data: cdm_groups,
        ports,
        scid: fields.get_u8(DciField::DmrsSeqInit),
        scrambling_id: cfg.carrier.phys_cell_id,
    };
    let layers = ports.count_ones().max(1) as u8;

    let scaling = if kind == DciKind::Dl10Ra {
        let ts = fields.get_u8(DciField::TbScaling);
        check_dci!(ts < 3, "tb scaling", ts);
        [1.0, 0.5, 0.25][ts as usize]
    } else {
        1.0
    };
    let params = TbsParams {
        nb_rb: rb_size,
        nb_symb: row.nr_symbols,
        nb_re_dmrs: tables::dmrs_re_per_prb(dmrs_type, cdm_groups) * dmrs.num_symbols(),
        nb_rb_oh: if ctx.rnti_type == RntiType::C { cfg.pdsch.x_overhead as u32 } else { 0 },
        r: 0,
        qm: 0,
        layers,
        scaling,
    };
    let mcs_table = if fallback { McsTable::Qam64 } else { cfg.pdsch.mcs_table };
    let ndi = fields.get_u8(DciField::Ndi);
    let tb1 = resolve_tb(ctx, harq, pid, mcs_table, fields.get_u8(DciField::Mcs), ndi, fields.get_u8(DciField::Rv), params)?;

    // A second TB signalled as MCS 26 with RV 1 is disabled
    let tb2 = if !fallback && cfg.pdsch.max_codewords == 2 {
        let (mcs2, rv2) = (fields.get_u8(DciField::Mcs2), fields.get_u8(DciField::Rv2));
        if mcs2 == 26 && rv2 == 1 {
            None
        } else {
            let qm = tables::mcs_qm(mcs_table, mcs2);
            let rate = tables::mcs_code_rate(mcs_table, mcs2);
            let tbs = tables::compute_tbs(&TbsParams { r: rate, qm, ..params }) >> 3;
            check_dci!(tbs > 0, "tbs of second transport block", tbs);
            Some(PdschTb {
                mcs_index: mcs2,
                qam_mod_order: qm,
                target_code_rate: rate,
                tb_size: tbs,
                new_data: tb1.tb.new_data,
                rv: rv2,
            })
        }
    } else {
        None
    };

    if !fallback && fields.get(DciField::SrsRequest) != 0 {
        nr_core::unimplemented_log!("SRS request in DCI 1_1");
    }

    let harq_update = if ctx.is_broadcast() {
        None
    } else {
        let k1 = if fallback {
            1 + fields.get(DciField::K1) as u16
        } else {
            let idx = fields.get(DciField::K1);
            *cfg.pdsch.dl_data_to_ul_ack.get(idx as usize).ok_or(MacError::FalseDci { field: "k1", value: idx })? as u16
        };
        let feedback = feedback_schedule(ctx, fields, k1, row.k)?;
        Some(DlHarqUpdate { pid, ndi, r: tb1.r, tbs: tb1.tbs, feedback })
    };

    let pdsch = PdschPdu {
        rnti: ctx.rnti,
        rnti_type: ctx.rnti_type,
        harq_pid: pid,
        bwp_start: cfg.carrier.dl_bwp_start,
        bwp_size: n_rb,
        rb_start,
        rb_size,
        start_symbol: row.start_symbol,
        nr_symbols: row.nr_symbols,
        mapping_type_b: row.mapping_type_b,
        vrb_to_prb_interleaved: fields.get(DciField::VrbToPrb) != 0,
        mcs_table,
        dmrs,
        nr_layers: layers,
        tb1: tb1.tb,
        tb2,
        k1_feedback: harq_update.map(|h| h.feedback.feedback_slots),
    };
    Ok(DlAssignment { pdsch_time, pdsch, harq: harq_update })
}
