use std::sync::{Arc, RwLock};

use serde::Deserialize;

use nr_core::{slot_time::slots_per_frame, Rnti, SlotType, NR_MAX_NUM_LCGS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DuplexMode {
    Fdd,
    Tdd,
}

/// MCS index tables of TS 38.214 5.1.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum McsTable {
    /// Table 5.1.3.1-1
    Qam64,
    /// Table 5.1.3.1-2
    Qam256,
    /// Table 5.1.3.1-3
    Qam64LowSe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PucchFormat {
    F0,
    F1,
    F2,
    F3,
    F4,
}

impl PucchFormat {
    /// Formats 0 and 1 carry at most 2 HARQ bits plus SR
    pub fn is_short_payload(self) -> bool {
        matches!(self, PucchFormat::F0 | PucchFormat::F1)
    }
}

/// Number of SSBs per RACH occasion (TS 38.331 ssb-perRACH-Occasion)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SsbPerRo {
    OneEighth,
    OneFourth,
    OneHalf,
    One,
    Two,
    Four,
    Eight,
    Sixteen,
}

impl SsbPerRo {
    /// Returns (multiple_ssb_per_ro, ratio). With multiple SSBs per RO the ratio is the number
    /// of SSBs sharing one occasion, otherwise it is the number of occasions per SSB.
    pub fn ratio(self) -> (bool, u8) {
        match self {
            SsbPerRo::OneEighth => (false, 8),
            SsbPerRo::OneFourth => (false, 4),
            SsbPerRo::OneHalf => (false, 2),
            SsbPerRo::One => (true, 1),
            SsbPerRo::Two => (true, 2),
            SsbPerRo::Four => (true, 4),
            SsbPerRo::Eight => (true, 8),
            SsbPerRo::Sixteen => (true, 16),
        }
    }
}

/// TDD-UL-DL-Pattern, slot granularity. The pattern repeats every `period_slots`:
/// first `dl_slots` downlink slots, then an optional mixed slot, then `ul_slots` uplink slots.
#[derive(Debug, Clone)]
pub struct CfgTddPattern {
    pub period_slots: u16,
    pub dl_slots: u16,
    pub ul_slots: u16,
    /// Uplink symbols at the end of the mixed slot, 0 if the mixed slot carries no uplink
    pub mixed_ul_symbols: u8,
}

#[derive(Debug, Clone)]
pub struct CfgCarrier {
    /// Subcarrier spacing 15 kHz * 2^mu
    pub numerology: u8,
    pub duplex: DuplexMode,
    pub tdd: Option<CfgTddPattern>,
    pub phys_cell_id: u16,
    pub dl_bwp_start: u16,
    pub dl_bwp_size: u16,
    pub ul_bwp_start: u16,
    pub ul_bwp_size: u16,
    /// Size of CORESET 0, used for DCI 1_0 sizing in the common search space
    pub coreset0_size: u16,
    /// Number of dedicated bandwidth parts, sizes the BWP indicator
    pub num_dedicated_bwps: u8,
    /// ssb-PositionsInBurst, bit i set if SSB i is transmitted
    pub ssb_positions: u64,
    /// cellSpecificKoffset for non-terrestrial networks, in slots
    pub ntn_koffset: u16,
}

impl CfgCarrier {
    pub fn slots_per_frame(&self) -> u16 {
        slots_per_frame(self.numerology)
    }

    pub fn num_ssb(&self) -> u32 {
        self.ssb_positions.count_ones()
    }

    pub fn slot_type(&self, slot: u16) -> SlotType {
        let Some(tdd) = &self.tdd else {
            return SlotType::Mixed;
        };
        let idx = slot % tdd.period_slots;
        if idx < tdd.dl_slots {
            SlotType::Downlink
        } else if idx >= tdd.period_slots - tdd.ul_slots {
            SlotType::Uplink
        } else {
            SlotType::Mixed
        }
    }

    /// True if the slot has any uplink symbols
    pub fn is_ul_slot(&self, slot: u16) -> bool {
        match self.slot_type(slot) {
            SlotType::Uplink => true,
            SlotType::Mixed => self.tdd.as_ref().is_none_or(|t| t.mixed_ul_symbols > 0),
            _ => false,
        }
    }

    pub fn is_dl_slot(&self, slot: u16) -> bool {
        self.slot_type(slot).has_downlink()
    }
}

/// PDSCH-TimeDomainResourceAllocation
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgPdschTdra {
    pub k0: u8,
    pub start_symbol: u8,
    pub nr_symbols: u8,
    #[serde(default)]
    pub mapping_type_b: bool,
}

#[derive(Debug, Clone)]
pub struct CfgPdsch {
    pub mcs_table: McsTable,
    /// Empty means default table A
    pub tdra: Vec<CfgPdschTdra>,
    /// dl-DataToUL-ACK, k1 candidates indexed by the DCI 1_1 feedback timing field
    pub dl_data_to_ul_ack: Vec<u8>,
    /// maxNrofCodeWordsScheduledByDCI, 1 or 2
    pub max_codewords: u8,
    pub dmrs_type: u8,
    pub dmrs_max_length: u8,
    pub dmrs_add_pos: u8,
    pub num_harq_processes: u8,
    pub tci_present: bool,
    pub vrb_to_prb_interleaved: bool,
    /// xOverhead in REs per PRB, 0/6/12/18
    pub x_overhead: u8,
}

/// PUSCH-TimeDomainResourceAllocation
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgPuschTdra {
    pub k2: u8,
    pub start_symbol: u8,
    pub nr_symbols: u8,
}

#[derive(Debug, Clone)]
pub struct CfgPusch {
    pub mcs_table: McsTable,
    pub transform_precoding: bool,
    /// Empty means default table A
    pub tdra: Vec<CfgPuschTdra>,
    pub max_rank: u8,
    pub num_antenna_ports: u8,
    /// txConfig codebook (true) or nonCodebook
    pub codebook_tx: bool,
    pub num_srs_resources: u8,
    pub freq_hopping: bool,
    /// reportTriggerSize for the CSI request field of DCI 0_1
    pub csi_request_bits: u8,
    /// CSI part 1 size of an aperiodic report carried on PUSCH
    pub aperiodic_csi_bits: u16,
    pub dmrs_type: u8,
    pub dmrs_max_length: u8,
    pub dmrs_add_pos: u8,
    /// betaOffsetACK-Index1/2/3 of the semi-static UCI-OnPUSCH
    pub beta_offset_ack_index: [u8; 3],
    pub beta_offset_csi1_index: u8,
    pub p0_nominal: i16,
    /// msg3-DeltaPreamble in dB
    pub msg3_delta_preamble: i8,
    pub tpc_accumulation: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgPucchResource {
    pub id: u8,
    pub format: PucchFormat,
    pub start_prb: u16,
    pub second_hop_prb: Option<u16>,
    pub start_symbol: u8,
    pub nr_symbols: u8,
    /// Formats 2 and 3 only
    #[serde(default = "default_nr_prbs")]
    pub nr_prbs: u8,
    #[serde(default)]
    pub initial_cyclic_shift: u8,
    #[serde(default)]
    pub time_domain_occ: u8,
}

#[inline]
fn default_nr_prbs() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgPucchResourceSet {
    pub id: u8,
    pub resources: Vec<u8>,
    /// maxPayloadSize, absent means 1706
    pub max_payload_size: Option<u16>,
}

/// SchedulingRequestResourceConfig
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgSrResource {
    pub sr_id: u8,
    pub resource: u8,
    pub period: u16,
    pub offset: u16,
}

#[derive(Debug, Clone)]
pub struct CfgPucch {
    /// pucch-ResourceCommon, row of TS 38.213 Table 9.2.1-1
    pub common_resource_index: u8,
    pub resources: Vec<CfgPucchResource>,
    pub resource_sets: Vec<CfgPucchResourceSet>,
    pub sr_resources: Vec<CfgSrResource>,
    pub simultaneous_harq_ack_csi: bool,
    pub p0_nominal: i16,
    pub hopping_id: Option<u16>,
}

impl CfgPucch {
    pub fn resource(&self, id: u8) -> Option<&CfgPucchResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn sr_resource(&self, sr_id: u8) -> Option<&CfgSrResource> {
        self.sr_resources.iter().find(|r| r.sr_id == sr_id)
    }

    pub fn has_dedicated_sets(&self) -> bool {
        !self.resource_sets.is_empty()
    }
}

/// Periodic CSI-ReportConfig on PUCCH
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgCsiReport {
    pub id: u8,
    pub resource: u8,
    pub period: u16,
    pub offset: u16,
    pub nr_bits: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgSrsResource {
    pub id: u8,
    pub start_symbol: u8,
    pub nr_symbols: u8,
    #[serde(default = "default_comb_size")]
    pub comb_size: u8,
    #[serde(default)]
    pub freq_start: u16,
    pub bandwidth_prbs: u16,
    /// Periodic resource if set, aperiodic otherwise
    pub period: Option<u16>,
    #[serde(default)]
    pub offset: u16,
    /// slotOffset of an aperiodic resource set
    #[serde(default)]
    pub aperiodic_slot_offset: u8,
}

#[inline]
fn default_comb_size() -> u8 {
    2
}

/// Contention-free random access resources, as given by a handover command or PDCCH order
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgCfra {
    pub preamble_index: u8,
    pub ssb_index: u8,
}

/// RACH-ConfigCommon and RACH-ConfigGeneric with the PRACH occasion timing already resolved
/// from the configuration index.
#[derive(Debug, Clone)]
pub struct CfgRach {
    pub prach_config_index: u8,
    /// Occasions are present in frames where SFN mod x == y
    pub ro_frame_period: u8,
    pub ro_frame_offset: u8,
    /// Slots within the frame containing occasions
    pub ro_slots: Vec<u16>,
    pub ro_start_symbol: u8,
    /// Time-domain occasions per PRACH slot
    pub ros_per_slot: u8,
    pub ro_duration: u8,
    /// msg1-FDM, frequency-multiplexed occasions
    pub msg1_fdm: u8,
    pub msg1_frequency_start: u16,
    pub ssb_per_ro: SsbPerRo,
    pub cb_preambles_per_ssb: u8,
    pub total_preambles: u8,
    pub preamble_received_target_power: i16,
    pub power_ramping_step: u8,
    pub preamble_trans_max: u8,
    /// ra-ResponseWindow in slots
    pub ra_response_window: u16,
    /// ra-ContentionResolutionTimer in subframes
    pub contention_resolution_timer_sf: u16,
    /// scalingFactorBI in percent
    pub scaling_factor_bi: u8,
    pub ul_carrier_id: u8,
    pub cfra: Option<CfgCfra>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgLogicalChannel {
    pub lcid: u8,
    pub lcg: Option<u8>,
    /// Lower value is higher priority
    pub priority: u8,
    /// prioritisedBitRate in kB/s, absent means infinity
    pub pbr_kbytes: Option<u32>,
    #[serde(default = "default_bucket_size_duration")]
    pub bucket_size_duration_ms: u32,
    pub sr_id: Option<u8>,
    #[serde(default)]
    pub sr_delay_timer_applied: bool,
}

#[inline]
fn default_bucket_size_duration() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CfgSchedulingRequest {
    pub sr_id: u8,
    /// sr-ProhibitTimer in ms, 0 if not configured
    #[serde(default)]
    pub prohibit_timer_ms: u16,
    /// sr-TransMax
    pub trans_max: u8,
}

#[derive(Debug, Clone)]
pub struct CfgBsr {
    /// periodicBSR-Timer in subframes, None is infinity
    pub periodic_timer_sf: Option<u32>,
    /// retxBSR-Timer in subframes
    pub retx_timer_sf: u32,
    /// logicalChannelSR-DelayTimer in subframes
    pub sr_delay_timer_sf: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CfgTiming {
    /// Minimum slots between a DL reception and the UL transmission it causes.
    /// k1/k2 plus the NTN offset must exceed this. The UL slot indication runs this far ahead.
    pub min_rx_to_tx_slots: u8,
    /// Capacity of each per-slot config queue
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct UeMacConfig {
    pub debug_log: Option<String>,
    pub carrier: CfgCarrier,
    pub pdsch: CfgPdsch,
    pub pusch: CfgPusch,
    pub pucch: CfgPucch,
    pub csi_reports: Vec<CfgCsiReport>,
    pub srs_resources: Vec<CfgSrsResource>,
    pub rach: CfgRach,
    pub logical_channels: Vec<CfgLogicalChannel>,
    pub scheduling_requests: Vec<CfgSchedulingRequest>,
    pub bsr: CfgBsr,
    pub timing: CfgTiming,
}

impl Default for CfgCarrier {
    fn default() -> Self {
        Self {
            numerology: 1,
            duplex: DuplexMode::Tdd,
            // DDDDDDDSUU
            tdd: Some(CfgTddPattern { period_slots: 10, dl_slots: 7, ul_slots: 2, mixed_ul_symbols: 4 }),
            phys_cell_id: 0,
            dl_bwp_start: 0,
            dl_bwp_size: 106,
            ul_bwp_start: 0,
            ul_bwp_size: 106,
            coreset0_size: 48,
            num_dedicated_bwps: 1,
            ssb_positions: 0x1,
            ntn_koffset: 0,
        }
    }
}

impl Default for CfgPdsch {
    fn default() -> Self {
        Self {
            mcs_table: McsTable::Qam64,
            tdra: vec![],
            dl_data_to_ul_ack: vec![1, 2, 3, 4, 5, 6, 7, 8],
            max_codewords: 1,
            dmrs_type: 1,
            dmrs_max_length: 1,
            dmrs_add_pos: 1,
            num_harq_processes: 16,
            tci_present: false,
            vrb_to_prb_interleaved: false,
            x_overhead: 0,
        }
    }
}

impl Default for CfgPusch {
    fn default() -> Self {
        Self {
            mcs_table: McsTable::Qam64,
            transform_precoding: false,
            tdra: vec![],
            max_rank: 1,
            num_antenna_ports: 1,
            codebook_tx: true,
            num_srs_resources: 1,
            freq_hopping: false,
            csi_request_bits: 0,
            aperiodic_csi_bits: 0,
            dmrs_type: 1,
            dmrs_max_length: 1,
            dmrs_add_pos: 1,
            beta_offset_ack_index: [9, 9, 9],
            beta_offset_csi1_index: 13,
            p0_nominal: -90,
            msg3_delta_preamble: 0,
            tpc_accumulation: true,
        }
    }
}

impl Default for CfgPucch {
    fn default() -> Self {
        let f0 = |id, start_prb, start_symbol, nr_symbols| CfgPucchResource {
            id,
            format: PucchFormat::F0,
            start_prb,
            second_hop_prb: None,
            start_symbol,
            nr_symbols,
            nr_prbs: 1,
            initial_cyclic_shift: 0,
            time_domain_occ: 0,
        };
        let f2 = |id, start_prb| CfgPucchResource {
            id,
            format: PucchFormat::F2,
            start_prb,
            second_hop_prb: None,
            start_symbol: 12,
            nr_symbols: 2,
            nr_prbs: 4,
            initial_cyclic_shift: 0,
            time_domain_occ: 0,
        };
        Self {
            common_resource_index: 0,
            resources: vec![f0(0, 0, 12, 2), f0(1, 1, 12, 2), f2(2, 2), f0(3, 6, 12, 2), f2(4, 8)],
            resource_sets: vec![
                CfgPucchResourceSet { id: 0, resources: vec![0, 1], max_payload_size: None },
                CfgPucchResourceSet { id: 1, resources: vec![2], max_payload_size: None },
            ],
            sr_resources: vec![CfgSrResource { sr_id: 0, resource: 3, period: 10, offset: 8 }],
            simultaneous_harq_ack_csi: true,
            p0_nominal: -90,
            hopping_id: None,
        }
    }
}

impl Default for CfgRach {
    fn default() -> Self {
        Self {
            prach_config_index: 159,
            ro_frame_period: 1,
            ro_frame_offset: 0,
            ro_slots: vec![19],
            ro_start_symbol: 0,
            ros_per_slot: 1,
            ro_duration: 12,
            msg1_fdm: 1,
            msg1_frequency_start: 0,
            ssb_per_ro: SsbPerRo::One,
            cb_preambles_per_ssb: 64,
            total_preambles: 64,
            preamble_received_target_power: -96,
            power_ramping_step: 2,
            preamble_trans_max: 10,
            ra_response_window: 20,
            contention_resolution_timer_sf: 64,
            scaling_factor_bi: 100,
            ul_carrier_id: 0,
            cfra: None,
        }
    }
}

impl Default for CfgBsr {
    fn default() -> Self {
        Self { periodic_timer_sf: Some(10), retx_timer_sf: 80, sr_delay_timer_sf: None }
    }
}

impl Default for CfgTiming {
    fn default() -> Self {
        Self { min_rx_to_tx_slots: 1, queue_capacity: 10 }
    }
}

impl Default for UeMacConfig {
    fn default() -> Self {
        Self {
            debug_log: None,
            carrier: CfgCarrier::default(),
            pdsch: CfgPdsch::default(),
            pusch: CfgPusch::default(),
            pucch: CfgPucch::default(),
            csi_reports: vec![],
            srs_resources: vec![],
            rach: CfgRach::default(),
            logical_channels: vec![
                CfgLogicalChannel {
                    lcid: 1,
                    lcg: Some(0),
                    priority: 1,
                    pbr_kbytes: None,
                    bucket_size_duration_ms: 100,
                    sr_id: Some(0),
                    sr_delay_timer_applied: false,
                },
                CfgLogicalChannel {
                    lcid: 4,
                    lcg: Some(1),
                    priority: 10,
                    pbr_kbytes: Some(8),
                    bucket_size_duration_ms: 100,
                    sr_id: Some(0),
                    sr_delay_timer_applied: false,
                },
            ],
            scheduling_requests: vec![CfgSchedulingRequest { sr_id: 0, prohibit_timer_ms: 0, trans_max: 64 }],
            bsr: CfgBsr::default(),
            timing: CfgTiming::default(),
        }
    }
}

impl UeMacConfig {
    pub fn logical_channel(&self, lcid: u8) -> Option<&CfgLogicalChannel> {
        self.logical_channels.iter().find(|lc| lc.lcid == lcid)
    }

    pub fn scheduling_request(&self, sr_id: u8) -> Option<&CfgSchedulingRequest> {
        self.scheduling_requests.iter().find(|sr| sr.sr_id == sr_id)
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        let carrier = &self.carrier;
        if carrier.numerology > 4 {
            return Err("numerology must be 0..=4");
        }
        for size in [carrier.dl_bwp_size, carrier.ul_bwp_size, carrier.coreset0_size] {
            if size == 0 || size > 275 {
                return Err("bandwidth part and CORESET 0 sizes must be 1..=275 PRBs");
            }
        }
        if carrier.ssb_positions == 0 {
            return Err("ssb_positions must have at least one SSB");
        }
        if let Some(tdd) = &carrier.tdd {
            if tdd.period_slots == 0 || tdd.dl_slots + tdd.ul_slots > tdd.period_slots {
                return Err("TDD pattern does not fit its period");
            }
            if carrier.slots_per_frame() % tdd.period_slots != 0 {
                return Err("TDD period must divide the frame");
            }
        } else if carrier.duplex == DuplexMode::Tdd {
            return Err("TDD carrier needs a TDD pattern");
        }

        if self.pdsch.max_codewords == 0 || self.pdsch.max_codewords > 2 {
            return Err("max_codewords must be 1 or 2");
        }
        if self.pdsch.num_harq_processes == 0 || self.pdsch.num_harq_processes > 16 {
            return Err("num_harq_processes must be 1..=16");
        }
        if self.pdsch.dl_data_to_ul_ack.is_empty() || self.pdsch.dl_data_to_ul_ack.len() > 8 {
            return Err("dl_data_to_ul_ack must have 1..=8 entries");
        }
        if self.pdsch.tdra.iter().any(|t| t.start_symbol + t.nr_symbols > 14 || t.nr_symbols == 0) {
            return Err("PDSCH time domain allocation exceeds the slot");
        }
        if !matches!(self.pusch.num_antenna_ports, 1 | 2) || !matches!(self.pusch.max_rank, 1 | 2) {
            return Err("PUSCH supports 1 or 2 antenna ports and layers");
        }
        if self.pusch.max_rank > self.pusch.num_antenna_ports || self.pusch.num_srs_resources == 0 {
            return Err("PUSCH max_rank exceeds the antenna ports or no SRS resource");
        }
        if !matches!(self.pdsch.dmrs_type, 1 | 2) || !matches!(self.pusch.dmrs_type, 1 | 2) {
            return Err("DM-RS type must be 1 or 2");
        }
        if self.pusch.tdra.iter().any(|t| t.start_symbol + t.nr_symbols > 14 || t.nr_symbols == 0) {
            return Err("PUSCH time domain allocation exceeds the slot");
        }

        let pucch = &self.pucch;
        if pucch.common_resource_index > 15 {
            return Err("common PUCCH resource index must be 0..=15");
        }
        for r in &pucch.resources {
            if r.start_symbol + r.nr_symbols > 14 || r.nr_symbols == 0 {
                return Err("PUCCH resource exceeds the slot");
            }
        }
        for (i, set) in pucch.resource_sets.iter().enumerate() {
            let max_len = if i == 0 { 32 } else { 8 };
            if set.resources.is_empty() || set.resources.len() > max_len {
                return Err("PUCCH resource set has an invalid number of resources");
            }
            if set.resources.iter().any(|id| pucch.resource(*id).is_none()) {
                return Err("PUCCH resource set refers to an unknown resource");
            }
        }
        for sr in &pucch.sr_resources {
            match pucch.resource(sr.resource) {
                Some(r) if r.format.is_short_payload() => {}
                _ => return Err("SR resource must refer to a format 0/1 PUCCH resource"),
            }
            if sr.period == 0 || sr.offset >= sr.period {
                return Err("SR period/offset invalid");
            }
        }
        for csi in &self.csi_reports {
            match pucch.resource(csi.resource) {
                Some(r) if !r.format.is_short_payload() => {}
                _ => return Err("CSI report must refer to a format 2/3/4 PUCCH resource"),
            }
            if csi.period == 0 || csi.offset >= csi.period || csi.nr_bits == 0 {
                return Err("CSI report has an invalid period or size");
            }
        }

        let rach = &self.rach;
        if rach.ro_frame_period == 0 || rach.ro_slots.is_empty() || rach.ros_per_slot == 0 {
            return Err("RACH occasion timing is incomplete");
        }
        if !matches!(rach.msg1_fdm, 1 | 2 | 4 | 8) {
            return Err("msg1_fdm must be 1, 2, 4 or 8");
        }
        if rach.total_preambles == 0 || rach.total_preambles > 64 || rach.preamble_trans_max == 0 {
            return Err("invalid preamble configuration");
        }
        if let Some(cfra) = &rach.cfra {
            if cfra.preamble_index >= 64 || cfra.ssb_index >= 64 || (carrier.ssb_positions >> cfra.ssb_index) & 1 == 0 {
                return Err("contention-free RA refers to an invalid preamble or SSB");
            }
        }

        let mut seen = [false; 33];
        for lc in &self.logical_channels {
            if lc.lcid == 0 || lc.lcid > 32 || seen[lc.lcid as usize] {
                return Err("logical channel ids must be unique and 1..=32");
            }
            seen[lc.lcid as usize] = true;
            if lc.lcg.is_some_and(|g| g as usize >= NR_MAX_NUM_LCGS) {
                return Err("logical channel group must be 0..=7");
            }
            if lc.sr_id.is_some_and(|id| self.scheduling_request(id).is_none()) {
                return Err("logical channel refers to an unknown scheduling request");
            }
        }

        if self.timing.queue_capacity == 0 {
            return Err("queue capacity must be nonzero");
        }
        Ok(())
    }
}

/// MAC state as seen by the rest of the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UeMacState {
    #[default]
    NotSynced,
    Synced,
    PerformingRa,
    Connected,
}

/// Mutable, stack-editable state (lock-protected).
#[derive(Debug, Clone, Default)]
pub struct UeState {
    pub mac_state: UeMacState,
    /// Assigned once random access completes
    pub crnti: Option<Rnti>,
}

/// Global shared configuration: immutable config + mutable state.
#[derive(Clone)]
pub struct SharedConfig {
    /// Read-only configuration (immutable after construction).
    cfg: Arc<UeMacConfig>,
    /// Mutable state guarded with RwLock (written by the MAC, read by others).
    state: Arc<RwLock<UeState>>,
}

impl SharedConfig {
    pub fn from_config(cfg: UeMacConfig) -> Self {
        Self::from_parts(cfg, UeState::default())
    }

    pub fn from_parts(cfg: UeMacConfig, state: UeState) -> Self {
        // Check config for validity before returning the SharedConfig object
        if let Err(e) = cfg.validate() {
            panic!("Invalid UE MAC configuration: {}", e);
        }

        Self {
            cfg: Arc::new(cfg),
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Access immutable config.
    pub fn config(&self) -> Arc<UeMacConfig> {
        Arc::clone(&self.cfg)
    }

    /// Read guard for mutable state.
    pub fn state_read(&self) -> std::sync::RwLockReadGuard<'_, UeState> {
        self.state.read().expect("UeState RwLock poisoned")
    }

    /// Write guard for mutable state.
    pub fn state_write(&self) -> std::sync::RwLockWriteGuard<'_, UeState> {
        self.state.write().expect("UeState RwLock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(UeMacConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_tdd_slot_types() {
        let carrier = CfgCarrier::default();
        assert_eq!(carrier.slot_type(0), SlotType::Downlink);
        assert_eq!(carrier.slot_type(7), SlotType::Mixed);
        assert_eq!(carrier.slot_type(8), SlotType::Uplink);
        assert_eq!(carrier.slot_type(19), SlotType::Uplink);
        assert!(carrier.is_ul_slot(7));
        assert!(!carrier.is_ul_slot(3));
    }

    #[test]
    fn test_sr_resource_must_be_short_format() {
        let mut cfg = UeMacConfig::default();
        cfg.pucch.sr_resources[0].resource = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_duplicate_lcid_rejected() {
        let mut cfg = UeMacConfig::default();
        cfg.logical_channels[1].lcid = 1;
        assert!(cfg.validate().is_err());
    }
}
