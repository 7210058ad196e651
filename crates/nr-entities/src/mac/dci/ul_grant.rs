//! PUSCH grants from DCI 0_0, DCI 0_1 and the random access response.

use nr_config::{McsTable, UeMacConfig};
use nr_core::{Rnti, RntiType, SlotTime};
use nr_saps::phy_mac::{DmrsInfo, PuschPdu, UciOnPusch};

use super::tables::{self, TbsParams, TdraRow};
use super::{DciContext, DciField, DciFields, DciKind, DciSizes};
use crate::mac::errors::{check_dci, MacError};
use crate::mac::harq::{UlHarq, UlHarqProcess};
use crate::mac::ra::RarGrant;

/// TPC command for Msg3 in dB, TS 38.213 Table 8.2-2
const MSG3_TPC_DB: [i8; 8] = [-6, -4, -2, 0, 2, 4, 6, 8];

#[derive(Debug, Clone)]
pub struct UlGrant {
    pub pusch_time: SlotTime,
    /// Transmit power and payload are filled in by the MAC
    pub pusch: PuschPdu,
    /// State to store in the UL HARQ arena once the PUSCH is queued. None for a PUSCH
    /// without UL-SCH.
    pub harq: Option<(u8, UlHarqProcess)>,
    pub tpc_db: i8,
    /// SRS request field of DCI 0_1, when nonzero
    pub srs_request: Option<u8>,
}

impl UlGrant {
    /// A new UL-SCH transmission, which restarts retxBSR-Timer
    pub fn is_new_transmission(&self) -> bool {
        self.pusch.new_data && self.pusch.ulsch_present
    }
}

fn pusch_tdra(cfg: &UeMacConfig, rnti_type: RntiType, index: u8) -> Result<TdraRow, MacError> {
    let list = &cfg.pusch.tdra;
    let row = if rnti_type == RntiType::C && !list.is_empty() {
        list.get(index as usize).map(|t| TdraRow {
            k: t.k2,
            mapping_type_b: false,
            start_symbol: t.start_symbol,
            nr_symbols: t.nr_symbols,
        })
    } else {
        tables::pusch_default_tdra(index, cfg.carrier.numerology)
    };
    row.ok_or(MacError::FalseDci { field: "tdra", value: index as u32 })
}

/// Enforces the turnaround floor and that the PUSCH lands in an uplink slot
fn pusch_slot(cfg: &UeMacConfig, time: SlotTime, k2: u16) -> Result<SlotTime, MacError> {
    let slots = k2 + cfg.carrier.ntn_koffset;
    let floor = cfg.timing.min_rx_to_tx_slots as u16;
    assert!(
        slots > floor,
        "k2 {} + koffset {} does not exceed the minimum rx-to-tx time of {} slots",
        k2,
        cfg.carrier.ntn_koffset,
        floor
    );
    let pusch_time = time.add_slots(slots as i32);
    check_dci!(cfg.carrier.is_ul_slot(pusch_time.slot), "pusch slot", pusch_time.slot);
    Ok(pusch_time)
}

/// Single-port DM-RS used by fallback grants and Msg3
fn fallback_dmrs(cfg: &UeMacConfig, row: &TdraRow, add_pos: u8) -> DmrsInfo {
    let tp = cfg.pusch.transform_precoding;
    DmrsInfo {
        config_type: 1,
        symb_pos: tables::dmrs_symbols(row.mapping_type_b, row.start_symbol, row.nr_symbols, add_pos, true),
        num_cdm_grps_no_data: if !tp && row.nr_symbols < 3 { 1 } else { 2 },
        ports: 0b1,
        scid: 0,
        scrambling_id: cfg.carrier.phys_cell_id,
    }
}

fn tbs_bytes(rb_size: u16, row: &TdraRow, dmrs: &DmrsInfo, r: u16, qm: u8, layers: u8) -> u32 {
    let params = TbsParams {
        nb_rb: rb_size,
        nb_symb: row.nr_symbols,
        nb_re_dmrs: tables::dmrs_re_per_prb(dmrs.config_type, dmrs.num_cdm_grps_no_data) * dmrs.num_symbols(),
        nb_rb_oh: 0,
        r,
        qm,
        layers,
        scaling: 1.0,
    };
    tables::compute_tbs(&params) >> 3
}

/// Turns a decoded DCI 0_0 or 0_1 into a PUSCH configuration
pub fn interpret_ul_grant(
    ctx: &DciContext,
    sizes: &DciSizes,
    fields: &DciFields,
    harq: &UlHarq,
) -> Result<UlGrant, MacError> {
    let kind = fields.kind;
    assert!(kind.is_uplink(), "{:?} is not a UL grant", kind);
    let cfg = ctx.cfg;
    let pusch_cfg = &cfg.pusch;
    let fallback = kind == DciKind::Ul00;

    let n_rb = sizes.n_rb(kind);
    let fdra = fields.get(DciField::Fdra);
    let (rb_start, rb_size) = tables::riv_to_rbs(fdra, n_rb).ok_or(MacError::FalseDci { field: "fdra", value: fdra })?;

    let row = pusch_tdra(cfg, ctx.rnti_type, fields.get_u8(DciField::Tdra))?;
    let pusch_time = pusch_slot(cfg, ctx.time, row.k as u16)?;

    // Precoding and DM-RS
    let (layers, tpmi, dmrs) = if fallback {
        let add_pos = if ctx.rnti_type == RntiType::Tc { 2 } else { pusch_cfg.dmrs_add_pos };
        (1, 0, fallback_dmrs(cfg, &row, add_pos))
    } else {
        let (layers, tpmi) = if pusch_cfg.codebook_tx && pusch_cfg.num_antenna_ports == 2 {
            let value = fields.get_u8(DciField::Precoding);
            tables::precoding_2ports(value, pusch_cfg.max_rank)
                .ok_or(MacError::FalseDci { field: "precoding information", value: value as u32 })?
        } else {
            (1, 0)
        };
        let value = fields.get_u8(DciField::AntennaPorts);
        let (cdm, ports) = tables::ul_antenna_ports(value, pusch_cfg.transform_precoding, layers)
            .ok_or(MacError::FalseDci { field: "antenna ports", value: value as u32 })?;
        let dmrs = DmrsInfo {
            config_type: pusch_cfg.dmrs_type,
            symb_pos: tables::dmrs_symbols(row.mapping_type_b, row.start_symbol, row.nr_symbols, pusch_cfg.dmrs_add_pos, true),
            num_cdm_grps_no_data: cdm,
            ports,
            scid: fields.get_u8(DciField::DmrsSeqInit),
            scrambling_id: cfg.carrier.phys_cell_id,
        };
        (layers, tpmi, dmrs)
    };

    // UL-SCH and aperiodic CSI
    let ulsch_present = fallback || fields.get(DciField::UlschIndicator) != 0;
    let mut uci = UciOnPusch::default();
    if !fallback && fields.get(DciField::CsiRequest) != 0 && pusch_cfg.aperiodic_csi_bits > 0 {
        uci.csi_part1_bits = pusch_cfg.aperiodic_csi_bits;
        uci.beta_offset_csi1 = pusch_cfg.beta_offset_csi1_index;
    }
    check_dci!(ulsch_present || uci.csi_part1_bits > 0, "ul-sch indicator", 0);

    let pid = fields.get_u8(DciField::HarqPid);
    let mcs = fields.get_u8(DciField::Mcs);
    let ndi = fields.get_u8(DciField::Ndi);
    let mcs_table = if fallback { McsTable::Qam64 } else { pusch_cfg.mcs_table };
    let qm = tables::mcs_qm(mcs_table, mcs);
    let is_msg3 = fallback && ctx.rnti_type == RntiType::Tc;
    let process = harq.get(pid);

    let (new_data, r, tbs) = if !ulsch_present {
        (false, 0, 0)
    } else if is_msg3 {
        // TC-RNTI only ever schedules Msg3 retransmissions
        (false, process.r, process.tbs)
    } else {
        let new_data = process.last_ndi != Some(ndi);
        let (stored_r, stored_tbs) = if new_data { (0, 0) } else { (process.r, process.tbs) };
        let rate = tables::mcs_code_rate(mcs_table, mcs);
        if rate > 0 {
            (new_data, rate, tbs_bytes(rb_size, &row, &dmrs, rate, qm, layers))
        } else {
            (new_data, stored_r, stored_tbs)
        }
    };
    check_dci!(!ulsch_present || tbs > 0, "tbs", tbs);

    let tpc_db = tables::pusch_tpc_db(fields.get_u8(DciField::Tpc), pusch_cfg.tpc_accumulation);
    let srs_request = match fields.get_u8(DciField::SrsRequest) {
        0 => None,
        v if !fallback => Some(v),
        _ => None,
    };

    let pusch = PuschPdu {
        rnti: ctx.rnti,
        bwp_start: cfg.carrier.ul_bwp_start,
        bwp_size: n_rb,
        rb_start,
        rb_size,
        start_symbol: row.start_symbol,
        nr_symbols: row.nr_symbols,
        mcs_index: mcs,
        mcs_table,
        qam_mod_order: qm,
        target_code_rate: r,
        tb_size: tbs,
        harq_pid: pid,
        new_data,
        rv: fields.get_u8(DciField::Rv),
        nr_layers: layers,
        tpmi,
        transform_precoding: pusch_cfg.transform_precoding,
        dmrs,
        frequency_hopping: fields.get(DciField::FreqHopping) != 0 && pusch_cfg.freq_hopping,
        data_scrambling_id: cfg.carrier.phys_cell_id,
        ulsch_present,
        uci,
        tx_power: 0,
        is_msg3,
        payload: None,
    };
    let harq_update = ulsch_present.then_some((pid, UlHarqProcess { last_ndi: Some(ndi), r, tbs, delta_pusch: tpc_db }));
    tracing::debug!(
        ts = %ctx.time,
        "{} grant for {}: pid {} rbs {}+{} mcs {} tbs {} new_data {}",
        kind.format(),
        pusch_time,
        pid,
        rb_start,
        rb_size,
        mcs,
        tbs,
        new_data
    );
    Ok(UlGrant { pusch_time, pusch, harq: harq_update, tpc_db, srs_request })
}

/// Msg3 grant carried in a random access response received in `rar_time`
pub fn interpret_rar_grant(cfg: &UeMacConfig, rar_time: SlotTime, tc_rnti: Rnti, grant: &RarGrant) -> Result<UlGrant, MacError> {
    let n_rb = cfg.carrier.ul_bwp_size;
    let riv = grant.fdra as u32 & ((1u32 << tables::riv_bits(n_rb)) - 1);
    let (rb_start, rb_size) = tables::riv_to_rbs(riv, n_rb).ok_or(MacError::FalseDci { field: "msg3 fdra", value: riv })?;

    let row = pusch_tdra(cfg, RntiType::Tc, grant.tdra)?;
    let delta = tables::msg3_delta(cfg.carrier.numerology);
    let pusch_time = pusch_slot(cfg, rar_time, row.k as u16 + delta as u16)?;

    let dmrs = fallback_dmrs(cfg, &row, 2);
    let mcs = grant.mcs & 0xf;
    let qm = tables::mcs_qm(McsTable::Qam64, mcs);
    let r = tables::mcs_code_rate(McsTable::Qam64, mcs);
    let tbs = tbs_bytes(rb_size, &row, &dmrs, r, qm, 1);
    check_dci!(tbs > 0, "msg3 tbs", tbs);
    let tpc_db = MSG3_TPC_DB[(grant.tpc & 7) as usize];

    let pusch = PuschPdu {
        rnti: tc_rnti,
        bwp_start: cfg.carrier.ul_bwp_start,
        bwp_size: n_rb,
        rb_start,
        rb_size,
        start_symbol: row.start_symbol,
        nr_symbols: row.nr_symbols,
        mcs_index: mcs,
        mcs_table: McsTable::Qam64,
        qam_mod_order: qm,
        target_code_rate: r,
        tb_size: tbs,
        harq_pid: 0,
        new_data: true,
        rv: 0,
        nr_layers: 1,
        tpmi: 0,
        transform_precoding: cfg.pusch.transform_precoding,
        dmrs,
        frequency_hopping: grant.freq_hopping && cfg.pusch.freq_hopping,
        data_scrambling_id: cfg.carrier.phys_cell_id,
        ulsch_present: true,
        uci: UciOnPusch::default(),
        tx_power: 0,
        is_msg3: true,
        payload: None,
    };
    tracing::debug!(ts = %rar_time, "msg3 grant for {}: rbs {}+{} mcs {} tbs {}", pusch_time, rb_start, rb_size, mcs, tbs);
    Ok(UlGrant {
        pusch_time,
        pusch,
        harq: Some((0, UlHarqProcess { last_ndi: None, r, tbs, delta_pusch: tpc_db })),
        tpc_db,
        srs_request: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::dci::tables::rbs_to_riv;
    use nr_core::debug;
    use nr_saps::phy_mac::{CoresetType, SearchSpaceType};

    fn ctx(cfg: &UeMacConfig, rnti_type: RntiType) -> DciContext<'_> {
        // Default row 7 has k2 = 1 + j = 2, slot 6 + 2 lands in UL slot 8
        DciContext { cfg, time: SlotTime::new(3, 6, 1), rnti: 0x4601, rnti_type, n_cce: 0, n_cce_total: 8 }
    }

    fn ul00(ndi: u32, mcs: u32) -> DciFields {
        DciFields::new(DciKind::Ul00)
            .with(DciField::Fdra, rbs_to_riv(4, 20, 106))
            .with(DciField::Tdra, 7)
            .with(DciField::Mcs, mcs)
            .with(DciField::Ndi, ndi)
            .with(DciField::HarqPid, 2)
            .with(DciField::Tpc, 3)
    }

    fn css(cfg: &UeMacConfig) -> DciSizes {
        DciSizes::new(cfg, SearchSpaceType::Common, CoresetType::Coreset0)
    }

    #[test]
    fn test_ul00_new_data_and_retransmission() {
        debug::setup_logging_verbose();
        let cfg = UeMacConfig::default();
        let c = ctx(&cfg, RntiType::C);
        let mut harq = UlHarq::new();

        let g = interpret_ul_grant(&c, &css(&cfg), &ul00(1, 9), &harq).unwrap();
        assert_eq!(g.pusch_time, SlotTime::new(3, 8, 1));
        assert!(g.pusch.new_data);
        assert!(g.is_new_transmission());
        assert_eq!((g.pusch.rb_start, g.pusch.rb_size), (4, 20));
        assert_eq!(g.tpc_db, 3);
        assert!(g.pusch.tb_size > 0);
        let (pid, state) = g.harq.unwrap();
        harq.set(pid, state);

        // Same NDI, reserved MCS: stored size is reused
        let retx = interpret_ul_grant(&c, &css(&cfg), &ul00(1, 30), &harq).unwrap();
        assert!(!retx.pusch.new_data);
        assert_eq!(retx.pusch.tb_size, g.pusch.tb_size);
        assert_eq!(retx.pusch.target_code_rate, g.pusch.target_code_rate);
    }

    #[test]
    fn test_ul00_reserved_mcs_for_new_data() {
        debug::setup_logging_verbose();
        let cfg = UeMacConfig::default();
        let c = ctx(&cfg, RntiType::C);
        assert_eq!(
            interpret_ul_grant(&c, &css(&cfg), &ul00(1, 29), &UlHarq::new()).unwrap_err(),
            MacError::FalseDci { field: "tbs", value: 0 }
        );
    }

    #[test]
    fn test_pusch_in_downlink_slot() {
        debug::setup_logging_verbose();
        let cfg = UeMacConfig::default();
        let mut c = ctx(&cfg, RntiType::C);
        c.time = SlotTime::new(3, 1, 1);
        assert!(matches!(
            interpret_ul_grant(&c, &css(&cfg), &ul00(1, 9), &UlHarq::new()),
            Err(MacError::FalseDci { field: "pusch slot", .. })
        ));
    }

    #[test]
    #[should_panic(expected = "minimum rx-to-tx time")]
    fn test_k2_below_floor_is_fatal() {
        debug::setup_logging_verbose();
        let mut cfg = UeMacConfig::default();
        cfg.timing.min_rx_to_tx_slots = 3;
        let c = ctx(&cfg, RntiType::C);
        let _ = interpret_ul_grant(&c, &css(&cfg), &ul00(1, 9), &UlHarq::new());
    }

    #[test]
    fn test_tc_rnti_grant_is_msg3_retransmission() {
        debug::setup_logging_verbose();
        let cfg = UeMacConfig::default();
        let c = ctx(&cfg, RntiType::Tc);
        let mut harq = UlHarq::new();
        harq.set(2, UlHarqProcess { last_ndi: None, r: 1570, tbs: 11, delta_pusch: 0 });

        let g = interpret_ul_grant(&c, &css(&cfg), &ul00(1, 3), &harq).unwrap();
        assert!(g.pusch.is_msg3);
        assert!(!g.pusch.new_data);
        assert_eq!(g.pusch.tb_size, 11);
        assert_eq!(g.pusch.target_code_rate, 1570);
        // Msg3 uses the extra DM-RS positions
        assert_eq!(g.pusch.dmrs.num_symbols(), 3);
    }

    #[test]
    fn test_ul01_csi_only_pusch() {
        debug::setup_logging_verbose();
        let mut cfg = UeMacConfig::default();
        cfg.pusch.csi_request_bits = 1;
        cfg.pusch.aperiodic_csi_bits = 11;
        let c = ctx(&cfg, RntiType::C);
        let sizes = DciSizes::new(&cfg, SearchSpaceType::UeSpecific, CoresetType::Dedicated);
        let base = DciFields::new(DciKind::Ul01)
            .with(DciField::Fdra, rbs_to_riv(0, 10, 106))
            .with(DciField::Tdra, 7)
            .with(DciField::Mcs, 5)
            .with(DciField::Ndi, 1)
            .with(DciField::CsiRequest, 1)
            .with(DciField::SrsRequest, 1);

        let g = interpret_ul_grant(&c, &sizes, &base, &UlHarq::new()).unwrap();
        assert!(!g.pusch.ulsch_present);
        assert_eq!(g.pusch.tb_size, 0);
        assert_eq!(g.pusch.uci.csi_part1_bits, 11);
        assert!(g.harq.is_none());
        assert!(!g.is_new_transmission());
        assert_eq!(g.srs_request, Some(1));

        // Neither data nor CSI
        let empty = base.with(DciField::CsiRequest, 0);
        assert!(matches!(
            interpret_ul_grant(&c, &sizes, &empty, &UlHarq::new()),
            Err(MacError::FalseDci { field: "ul-sch indicator", .. })
        ));
    }

    #[test]
    fn test_ul01_two_layers() {
        debug::setup_logging_verbose();
        let mut cfg = UeMacConfig::default();
        cfg.pusch.num_antenna_ports = 2;
        cfg.pusch.max_rank = 2;
        let c = ctx(&cfg, RntiType::C);
        let sizes = DciSizes::new(&cfg, SearchSpaceType::UeSpecific, CoresetType::Dedicated);
        let fields = DciFields::new(DciKind::Ul01)
            .with(DciField::Fdra, rbs_to_riv(0, 50, 106))
            .with(DciField::Tdra, 7)
            .with(DciField::Mcs, 10)
            .with(DciField::Ndi, 1)
            .with(DciField::UlschIndicator, 1)
            .with(DciField::Precoding, 2)
            .with(DciField::AntennaPorts, 0);
        let g = interpret_ul_grant(&c, &sizes, &fields, &UlHarq::new()).unwrap();
        assert_eq!(g.pusch.nr_layers, 2);
        assert_eq!(g.pusch.dmrs.ports, 0b0011);
        assert!(g.pusch.ulsch_present);
        assert!(g.is_new_transmission());
    }

    #[test]
    fn test_rar_grant_msg3() {
        debug::setup_logging_verbose();
        let cfg = UeMacConfig::default();
        let grant = RarGrant {
            freq_hopping: false,
            fdra: rbs_to_riv(0, 8, 106) as u16,
            tdra: 0,
            mcs: 2,
            tpc: 3,
            csi_request: false,
        };
        // k2 = 0 + j 1, delta 3 for 30 kHz
        let g = interpret_rar_grant(&cfg, SlotTime::new(5, 4, 1), 0x1234, &grant).unwrap();
        assert_eq!(g.pusch_time, SlotTime::new(5, 8, 1));
        assert!(g.pusch.is_msg3);
        assert!(g.pusch.new_data);
        assert_eq!(g.pusch.rnti, 0x1234);
        assert_eq!(g.pusch.harq_pid, 0);
        assert_eq!(g.tpc_db, 0);
        assert_eq!(g.harq.unwrap().1.tbs, g.pusch.tb_size);
    }
}
