//! Minimal cell-side scheduler standing in for the network. It answers preambles with RARs,
//! Msg3 with Msg4, SRs and BSRs with UL grants, and pushes queued DL data.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use nr_config::{UeMacConfig, UeMacState};
use nr_core::{Lcid, Rnti, SlotTime, SlotType};
use nr_saps::phy_mac::{
    CoresetType, DciFormatGroup, DciInd, PdschPdu, PdschRxInd, PrachPdu, PucchPdu, PuschPdu, SearchSpaceType, SrsPdu,
    UlConfigPdu,
};

use crate::mac::dci::tables::{self, rbs_to_riv};
use crate::mac::dci::{self, DciField, DciFields, DciKind, DciSizes};
use crate::mac::mac_pdu::{self, DlSubPdu, UlMacCe, UlSubPdu};
use crate::mac::ra::{CONT_RES_ID_BYTES, MacRar, RarGrant, RarSubPdu, rar};

/// First TC-RNTI handed out
const FIRST_TC_RNTI: Rnti = 0x4601;
/// PDSCH allocation within CORESET 0: 24 PRBs at MCS 9
const PDSCH_RBS: u16 = 24;
const PDSCH_MCS: u32 = 9;
/// Msg3 allocation from the RAR: 10 PRBs at MCS 4
const MSG3_RBS: u16 = 10;
const MSG3_MCS: u8 = 4;
/// Dynamic UL grants: 20 PRBs at MCS 9
const PUSCH_RBS: u16 = 20;
const PUSCH_MCS: u32 = 9;
/// TPC field values meaning 0 dB
const TPC_0DB: u32 = 1;
const MSG3_TPC_0DB: u8 = 3;
/// Slot 0 aggregation level 4 candidate out of 16 CCEs
const N_CCE: u16 = 0;
const N_CCE_TOTAL: u16 = 16;

/// Commands from the application or a test
#[derive(Debug, Clone)]
pub enum GnbCommand {
    /// Queue an RLC SDU for DL transmission on `lcid`
    SendDl { lcid: Lcid, data: Vec<u8> },
    /// Order the UE to random access, contention free when `preamble_index` is nonzero
    PdcchOrder { preamble_index: u8, ssb_index: u8 },
    /// Leave the next `count` preambles unanswered
    IgnorePrach { count: u32 },
}

/// Everything the UE transmitted, for inspection
#[derive(Debug, Default, Clone)]
pub struct GnbStats {
    pub prach: Vec<(SlotTime, PrachPdu)>,
    pub pusch: Vec<(SlotTime, PuschPdu)>,
    pub pucch: Vec<(SlotTime, PucchPdu)>,
    pub srs: Vec<(SlotTime, SrsPdu)>,
    /// RLC SDUs received in UL
    pub ul_sdus: Vec<(Lcid, Vec<u8>)>,
    pub ul_grants: u32,
    pub dl_assignments: u32,
}

/// Content of a PDSCH, built once its transport block size is known
#[derive(Debug, Clone)]
enum DlContent {
    Rar(Vec<RarSubPdu>),
    Mac(Vec<DlSubPdu>),
    /// Filled from the DL backlog
    Data,
}

#[derive(Debug, Clone, Copy)]
struct PendingRar {
    rapid: u8,
    ra_rnti: Rnti,
    prach_time: SlotTime,
}

pub struct GnbEmulator {
    cfg: Arc<UeMacConfig>,
    sizes: DciSizes,

    next_tc_rnti: Rnti,
    tc_rnti: Option<Rnti>,
    crnti: Option<Rnti>,

    pending_rar: Option<PendingRar>,
    /// Earliest slot Msg4 may go out in, with the identity to echo
    pending_msg4: Option<(SlotTime, [u8; CONT_RES_ID_BYTES], Vec<u8>)>,
    pending_order: Option<(u8, u8)>,
    ignore_prach: u32,
    /// The UE asked for UL resources
    ul_demand: bool,
    dl_backlog: VecDeque<(Lcid, Vec<u8>)>,

    dl_content: HashMap<(SlotTime, Rnti), DlContent>,
    /// Counter DAI per feedback slot
    dai_count: HashMap<SlotTime, u8>,
    dl_ndi: [u8; 16],
    ul_ndi: [u8; 16],
    next_dl_pid: u8,
    next_ul_pid: u8,

    pub stats: GnbStats,
}

impl GnbEmulator {
    pub fn new(cfg: Arc<UeMacConfig>) -> Self {
        let sizes = DciSizes::new(&cfg, SearchSpaceType::Common, CoresetType::Coreset0);
        Self {
            cfg,
            sizes,
            next_tc_rnti: FIRST_TC_RNTI,
            tc_rnti: None,
            crnti: None,
            pending_rar: None,
            pending_msg4: None,
            pending_order: None,
            ignore_prach: 0,
            ul_demand: false,
            dl_backlog: VecDeque::new(),
            dl_content: HashMap::new(),
            dai_count: HashMap::new(),
            dl_ndi: [0; 16],
            ul_ndi: [0; 16],
            next_dl_pid: 0,
            next_ul_pid: 0,
            stats: GnbStats::default(),
        }
    }

    pub fn crnti(&self) -> Option<Rnti> {
        self.crnti
    }

    pub fn handle_command(&mut self, cmd: GnbCommand) {
        tracing::debug!("gnb command {:?}", cmd);
        match cmd {
            GnbCommand::SendDl { lcid, data } => self.dl_backlog.push_back((lcid, data)),
            GnbCommand::PdcchOrder { preamble_index, ssb_index } => {
                self.pending_order = Some((preamble_index, ssb_index))
            }
            GnbCommand::IgnorePrach { count } => self.ignore_prach = count,
        }
    }

    fn slot_type(&self, time: SlotTime) -> SlotType {
        self.cfg.carrier.slot_type(time.slot)
    }

    fn dci(&self, rnti: Rnti, fields: &DciFields) -> DciInd {
        DciInd {
            rnti,
            format: DciFormatGroup::Fallback,
            payload: dci::encode(&self.sizes, fields),
            ss_type: SearchSpaceType::Common,
            coreset_type: CoresetType::Coreset0,
            n_cce: N_CCE,
            n_cce_total: N_CCE_TOTAL,
        }
    }

    /// PDCCHs sent in DL slot `time`: at most one DL assignment and one UL grant
    pub fn dl_slot(&mut self, time: SlotTime, ue_state: UeMacState) -> Vec<DciInd> {
        let mut out = Vec::new();
        self.dl_content.retain(|(t, _), _| t.diff(time) >= -20);
        self.dai_count.retain(|t, _| t.diff(time) >= 0);

        if let Some(dci) = self.schedule_downlink(time, ue_state) {
            out.push(dci);
        }
        if let Some(dci) = self.schedule_uplink(time) {
            out.push(dci);
        }
        out
    }

    fn schedule_downlink(&mut self, time: SlotTime, ue_state: UeMacState) -> Option<DciInd> {
        if self.slot_type(time) != SlotType::Downlink {
            return None;
        }

        if let Some(rar) = self.pending_rar {
            if time.diff(rar.prach_time) > 0 {
                if let Some(dci) = self.schedule_rar(time, rar) {
                    self.pending_rar = None;
                    return Some(dci);
                }
            }
        }

        if let Some(crnti) = self.crnti {
            if let Some((preamble_index, ssb_index)) = self.pending_order.take() {
                let fdra_bits = self.sizes.width(DciKind::PdcchOrder, DciField::Fdra);
                let fields = DciFields::new(DciKind::PdcchOrder)
                    .with(DciField::Identifier, 1)
                    .with(DciField::Fdra, (1u32 << fdra_bits) - 1)
                    .with(DciField::PreambleIndex, preamble_index as u32)
                    .with(DciField::SsbIndex, ssb_index as u32);
                tracing::info!(ts = %time, "gnb: pdcch order preamble {}", preamble_index);
                return Some(self.dci(crnti, &fields));
            }
        }

        if let Some((after, cr_id, sdu)) = self.pending_msg4.clone() {
            let tc_rnti = self.tc_rnti?;
            if time.diff(after) <= 0 {
                return None;
            }
            let content = DlContent::Mac(vec![
                DlSubPdu::ContentionResolutionId(cr_id),
                DlSubPdu::Sdu { lcid: 0, data: sdu },
            ]);
            let dci = self.schedule_pdsch(time, tc_rnti, content)?;
            tracing::info!(ts = %time, "gnb: Msg4 to tc-rnti {:#06x}", tc_rnti);
            self.pending_msg4 = None;
            // Assume the UE resolves contention with it
            self.crnti = Some(tc_rnti);
            return Some(dci);
        }

        // Data waits until the UE reports a completed random access
        if ue_state == UeMacState::Connected && !self.dl_backlog.is_empty() {
            let crnti = self.crnti?;
            return self.schedule_pdsch(time, crnti, DlContent::Data);
        }
        None
    }

    fn schedule_rar(&mut self, time: SlotTime, rar: PendingRar) -> Option<DciInd> {
        let mu = self.cfg.carrier.numerology;
        let delta = tables::msg3_delta(mu) as i32;
        let floor = self.cfg.timing.min_rx_to_tx_slots as i32;
        let tdra = (0..16u8).find(|i| {
            tables::pusch_default_tdra(*i, mu).is_some_and(|row| {
                let k = row.k as i32 + delta;
                k > floor && self.slot_type(time.add_slots(k)) == SlotType::Uplink && !row.mapping_type_b
            })
        })?;

        let tc_rnti = match self.crnti {
            Some(crnti) => crnti,
            None => {
                let t = self.next_tc_rnti;
                self.next_tc_rnti = self.next_tc_rnti.wrapping_add(1);
                t
            }
        };
        self.tc_rnti = Some(tc_rnti);

        let n_ul = self.cfg.carrier.ul_bwp_size;
        let grant = RarGrant {
            freq_hopping: false,
            fdra: rbs_to_riv(0, MSG3_RBS.min(n_ul), n_ul) as u16,
            tdra,
            mcs: MSG3_MCS,
            tpc: MSG3_TPC_0DB,
            csi_request: false,
        };
        let sub = RarSubPdu::Rar(MacRar { rapid: rar.rapid, timing_advance: 0, grant, tc_rnti });
        tracing::info!(ts = %time, "gnb: RAR for rapid {} tc-rnti {:#06x} msg3 row {}", rar.rapid, tc_rnti, tdra);

        let fields = DciFields::new(DciKind::Dl10Ra)
            .with(DciField::Fdra, rbs_to_riv(0, PDSCH_RBS, self.sizes.n_rb_10))
            .with(DciField::Tdra, 0)
            .with(DciField::Mcs, PDSCH_MCS);
        self.dl_content.insert((time, rar.ra_rnti), DlContent::Rar(vec![sub]));
        self.stats.dl_assignments += 1;
        Some(self.dci(rar.ra_rnti, &fields))
    }

    /// DCI 1_0 on `rnti` for a PDSCH in `time`, with HARQ-ACK in the first UL slot the K1 field reaches
    fn schedule_pdsch(&mut self, time: SlotTime, rnti: Rnti, content: DlContent) -> Option<DciInd> {
        let floor = self.cfg.timing.min_rx_to_tx_slots as i32;
        let k1_field = (0..8u32).find(|f| {
            let k1 = 1 + *f as i32;
            k1 > floor && self.cfg.carrier.is_ul_slot(time.add_slots(k1).slot)
        })?;
        let feedback_time = time.add_slots(1 + k1_field as i32);
        let count = self.dai_count.entry(feedback_time).or_insert(0);
        let dai = *count % 4;
        *count += 1;

        let pid = self.next_dl_pid;
        self.next_dl_pid = (self.next_dl_pid + 1) % self.cfg.pdsch.num_harq_processes;
        self.dl_ndi[pid as usize] ^= 1;

        let fields = DciFields::new(DciKind::Dl10)
            .with(DciField::Identifier, 1)
            .with(DciField::Fdra, rbs_to_riv(0, PDSCH_RBS, self.sizes.n_rb_10))
            .with(DciField::Tdra, 0)
            .with(DciField::Mcs, PDSCH_MCS)
            .with(DciField::Ndi, self.dl_ndi[pid as usize] as u32)
            .with(DciField::HarqPid, pid as u32)
            .with(DciField::Dai, dai as u32)
            .with(DciField::Tpc, TPC_0DB)
            .with(DciField::Pri, 0)
            .with(DciField::K1, k1_field);
        self.dl_content.insert((time, rnti), content);
        self.stats.dl_assignments += 1;
        Some(self.dci(rnti, &fields))
    }

    fn schedule_uplink(&mut self, time: SlotTime) -> Option<DciInd> {
        if !self.ul_demand || !self.slot_type(time).has_downlink() {
            return None;
        }
        let crnti = self.crnti?;
        let mu = self.cfg.carrier.numerology;
        let floor = self.cfg.timing.min_rx_to_tx_slots as i32;
        let tdra = (0..16u8).find(|i| {
            tables::pusch_default_tdra(*i, mu).is_some_and(|row| {
                let k2 = row.k as i32;
                k2 > floor && self.slot_type(time.add_slots(k2)) == SlotType::Uplink && !row.mapping_type_b
            })
        })?;

        let pid = self.next_ul_pid;
        self.next_ul_pid = (self.next_ul_pid + 1) % 16;
        self.ul_ndi[pid as usize] ^= 1;
        let n_ul = self.cfg.carrier.ul_bwp_size;
        let fields = DciFields::new(DciKind::Ul00)
            .with(DciField::Fdra, rbs_to_riv(0, PUSCH_RBS.min(n_ul), n_ul))
            .with(DciField::Tdra, tdra as u32)
            .with(DciField::Mcs, PUSCH_MCS)
            .with(DciField::Ndi, self.ul_ndi[pid as usize] as u32)
            .with(DciField::HarqPid, pid as u32)
            .with(DciField::Tpc, TPC_0DB);
        tracing::info!(ts = %time, "gnb: UL grant to {:#06x} pid {} row {}", crnti, pid, tdra);
        self.ul_demand = false;
        self.stats.ul_grants += 1;
        Some(self.dci(crnti, &fields))
    }

    /// Decode result for a PDSCH the UE configured
    pub fn pdsch_rx(&mut self, time: SlotTime, pdsch: &PdschPdu) -> PdschRxInd {
        let tb_size = pdsch.tb1.tb_size as usize;
        let pdu = match self.dl_content.remove(&(time, pdsch.rnti)) {
            Some(DlContent::Rar(subpdus)) => Some(rar::build_rar_pdu(&subpdus, tb_size)),
            Some(DlContent::Mac(subpdus)) => Some(mac_pdu::build_dl_pdu(&subpdus, tb_size)),
            Some(DlContent::Data) => Some(self.build_data_pdu(tb_size)),
            None => {
                tracing::warn!(ts = %time, "gnb: no PDSCH content for rnti {:#06x}", pdsch.rnti);
                None
            }
        };
        PdschRxInd { rnti: pdsch.rnti, harq_pid: pdsch.harq_pid, tb: 0, ack: pdu.is_some(), pdu }
    }

    fn build_data_pdu(&mut self, tb_size: usize) -> Vec<u8> {
        let mut subpdus = Vec::new();
        let mut used = 0;
        while let Some((lcid, data)) = self.dl_backlog.pop_front() {
            let len = data.len() + mac_pdu::sdu_subheader_len(data.len());
            if used + len > tb_size {
                self.dl_backlog.push_front((lcid, data));
                break;
            }
            used += len;
            subpdus.push(DlSubPdu::Sdu { lcid, data });
        }
        if subpdus.is_empty() {
            tracing::warn!("gnb: DL SDU larger than a transport block of {} bytes dropped", tb_size);
            self.dl_backlog.pop_front();
        }
        mac_pdu::build_dl_pdu(&subpdus, tb_size)
    }

    /// Takes in everything the UE configured for UL slot `time`
    pub fn on_ul_slot(&mut self, time: SlotTime, ul: &[UlConfigPdu]) {
        for pdu in ul {
            match pdu {
                UlConfigPdu::Prach(p) => self.rx_prach(time, p),
                UlConfigPdu::Pusch(p) => self.rx_pusch(time, p),
                UlConfigPdu::Pucch(p) => {
                    if p.sr_flag {
                        tracing::debug!(ts = %time, "gnb: positive SR");
                        self.ul_demand = true;
                    }
                    self.stats.pucch.push((time, p.clone()));
                }
                UlConfigPdu::Srs(p) => self.stats.srs.push((time, p.clone())),
            }
        }
    }

    fn rx_prach(&mut self, time: SlotTime, p: &PrachPdu) {
        self.stats.prach.push((time, p.clone()));
        if self.ignore_prach > 0 {
            self.ignore_prach -= 1;
            tracing::info!(ts = %time, "gnb: preamble {} ignored", p.preamble_index);
            return;
        }
        tracing::info!(ts = %time, "gnb: preamble {} ra-rnti {:#06x}", p.preamble_index, p.ra_rnti);
        self.pending_rar = Some(PendingRar { rapid: p.preamble_index, ra_rnti: p.ra_rnti, prach_time: time });
    }

    fn rx_pusch(&mut self, time: SlotTime, p: &PuschPdu) {
        self.stats.pusch.push((time, p.clone()));
        let Some(payload) = &p.payload else { return };
        let subpdus = match mac_pdu::parse_ul_pdu(payload) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(ts = %time, "gnb: UL MAC PDU parse failed: {}", e);
                return;
            }
        };
        for sub in subpdus {
            match sub {
                UlSubPdu::Ccch(sdu) if p.is_msg3 => {
                    let mut cr_id = [0u8; CONT_RES_ID_BYTES];
                    let n = sdu.len().min(CONT_RES_ID_BYTES);
                    cr_id[..n].copy_from_slice(&sdu[..n]);
                    tracing::info!(ts = %time, "gnb: Msg3 CCCH {:02x?}", sdu);
                    self.pending_msg4 = Some((time, cr_id, vec![0x20, 0x40, 0x03]));
                }
                UlSubPdu::Ccch(_) => tracing::warn!("gnb: CCCH outside Msg3"),
                UlSubPdu::Ce(UlMacCe::Crnti(crnti)) => {
                    tracing::info!(ts = %time, "gnb: C-RNTI CE {:#06x}", crnti);
                    self.crnti = Some(crnti);
                    self.tc_rnti = None;
                    self.ul_demand = true;
                }
                UlSubPdu::Ce(UlMacCe::ShortBsr { index, .. } | UlMacCe::ShortTruncatedBsr { index, .. }) => {
                    self.ul_demand = index > 0;
                }
                UlSubPdu::Ce(UlMacCe::LongBsr { indices, .. } | UlMacCe::LongTruncatedBsr { indices, .. }) => {
                    self.ul_demand = indices.iter().any(|i| *i > 0);
                }
                UlSubPdu::Sdu { lcid, data } => self.stats.ul_sdus.push((lcid, data)),
            }
        }
    }
}
