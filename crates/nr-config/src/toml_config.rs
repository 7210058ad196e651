use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use toml::Value;

use super::ue_config::{
    CfgBsr, CfgCarrier, CfgCfra, CfgCsiReport, CfgLogicalChannel, CfgPdsch, CfgPdschTdra, CfgPucch, CfgPucchResource,
    CfgPucchResourceSet, CfgPusch, CfgPuschTdra, CfgRach, CfgSchedulingRequest, CfgSrResource, CfgSrsResource,
    CfgTddPattern, CfgTiming, DuplexMode, McsTable, SharedConfig, SsbPerRo, UeMacConfig,
};

const EXPECTED_CONFIG_VERSION: &str = "0.1";

/// Build `SharedConfig` from a TOML configuration string
pub fn from_toml_str(toml_str: &str) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let root: TomlConfigRoot = toml::from_str(toml_str)?;

    if root.config_version != EXPECTED_CONFIG_VERSION {
        return Err(format!(
            "Unrecognized config_version: {}, expect {}",
            root.config_version, EXPECTED_CONFIG_VERSION
        )
        .into());
    }
    check_extra("top-level", &root.extra)?;
    if let Some(ref c) = root.carrier {
        check_extra("carrier", &c.extra)?;
        if let Some(ref t) = c.tdd {
            check_extra("carrier.tdd", &t.extra)?;
        }
    }
    if let Some(ref p) = root.pdsch {
        check_extra("pdsch", &p.extra)?;
    }
    if let Some(ref p) = root.pusch {
        check_extra("pusch", &p.extra)?;
    }
    if let Some(ref p) = root.pucch {
        check_extra("pucch", &p.extra)?;
    }
    if let Some(ref r) = root.rach {
        check_extra("rach", &r.extra)?;
    }
    if let Some(ref b) = root.bsr {
        check_extra("bsr", &b.extra)?;
    }
    if let Some(ref t) = root.timing {
        check_extra("timing", &t.extra)?;
    }

    let mut cfg = UeMacConfig { debug_log: root.debug_log, ..Default::default() };

    if let Some(c) = root.carrier {
        apply_carrier_patch(&mut cfg.carrier, c);
    }
    if let Some(p) = root.pdsch {
        apply_pdsch_patch(&mut cfg.pdsch, p);
    }
    if let Some(p) = root.pusch {
        apply_pusch_patch(&mut cfg.pusch, p);
    }
    if let Some(p) = root.pucch {
        apply_pucch_patch(&mut cfg.pucch, p);
    }
    if let Some(r) = root.rach {
        apply_rach_patch(&mut cfg.rach, r);
    }
    if let Some(b) = root.bsr {
        apply_bsr_patch(&mut cfg.bsr, b);
    }
    if let Some(t) = root.timing {
        apply_timing_patch(&mut cfg.timing, t);
    }

    // Lists replace the defaults wholesale when present
    if let Some(v) = root.csi_report {
        cfg.csi_reports = v;
    }
    if let Some(v) = root.srs_resource {
        cfg.srs_resources = v;
    }
    if let Some(v) = root.logical_channel {
        cfg.logical_channels = v;
    }
    if let Some(v) = root.scheduling_request {
        cfg.scheduling_requests = v;
    }

    cfg.validate()?;
    Ok(SharedConfig::from_config(cfg))
}

/// Build `SharedConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let mut contents = String::new();
    let mut reader = BufReader::new(reader);
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build `SharedConfig` from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let f = File::open(path)?;
    from_reader(f)
}

fn check_extra(section: &str, extra: &HashMap<String, Value>) -> Result<(), Box<dyn std::error::Error>> {
    if extra.is_empty() {
        Ok(())
    } else {
        Err(format!("Unrecognized fields in {}: {:?}", section, sorted_keys(extra)).into())
    }
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<&str> {
    let mut v: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
    v.sort_unstable();
    v
}

fn apply_carrier_patch(dst: &mut CfgCarrier, src: CarrierDto) {
    if let Some(v) = src.numerology {
        dst.numerology = v;
    }
    if let Some(v) = src.duplex {
        dst.duplex = v;
    }
    if dst.duplex == DuplexMode::Fdd {
        dst.tdd = None;
    }
    if let Some(t) = src.tdd {
        dst.tdd = Some(CfgTddPattern {
            period_slots: t.period_slots,
            dl_slots: t.dl_slots,
            ul_slots: t.ul_slots,
            mixed_ul_symbols: t.mixed_ul_symbols.unwrap_or(0),
        });
    }
    if let Some(v) = src.phys_cell_id {
        dst.phys_cell_id = v;
    }
    if let Some(v) = src.dl_bwp_start {
        dst.dl_bwp_start = v;
    }
    if let Some(v) = src.dl_bwp_size {
        dst.dl_bwp_size = v;
    }
    if let Some(v) = src.ul_bwp_start {
        dst.ul_bwp_start = v;
    }
    if let Some(v) = src.ul_bwp_size {
        dst.ul_bwp_size = v;
    }
    if let Some(v) = src.coreset0_size {
        dst.coreset0_size = v;
    }
    if let Some(v) = src.num_dedicated_bwps {
        dst.num_dedicated_bwps = v;
    }
    if let Some(v) = src.ssb_positions {
        dst.ssb_positions = v;
    }
    if let Some(v) = src.ntn_koffset {
        dst.ntn_koffset = v;
    }
}

fn apply_pdsch_patch(dst: &mut CfgPdsch, src: PdschDto) {
    if let Some(v) = src.mcs_table {
        dst.mcs_table = v;
    }
    if let Some(v) = src.tdra {
        dst.tdra = v;
    }
    if let Some(v) = src.dl_data_to_ul_ack {
        dst.dl_data_to_ul_ack = v;
    }
    if let Some(v) = src.max_codewords {
        dst.max_codewords = v;
    }
    if let Some(v) = src.dmrs_type {
        dst.dmrs_type = v;
    }
    if let Some(v) = src.dmrs_max_length {
        dst.dmrs_max_length = v;
    }
    if let Some(v) = src.dmrs_add_pos {
        dst.dmrs_add_pos = v;
    }
    if let Some(v) = src.num_harq_processes {
        dst.num_harq_processes = v;
    }
    if let Some(v) = src.tci_present {
        dst.tci_present = v;
    }
    if let Some(v) = src.vrb_to_prb_interleaved {
        dst.vrb_to_prb_interleaved = v;
    }
    if let Some(v) = src.x_overhead {
        dst.x_overhead = v;
    }
}

fn apply_pusch_patch(dst: &mut CfgPusch, src: PuschDto) {
    if let Some(v) = src.mcs_table {
        dst.mcs_table = v;
    }
    if let Some(v) = src.transform_precoding {
        dst.transform_precoding = v;
    }
    if let Some(v) = src.tdra {
        dst.tdra = v;
    }
    if let Some(v) = src.max_rank {
        dst.max_rank = v;
    }
    if let Some(v) = src.num_antenna_ports {
        dst.num_antenna_ports = v;
    }
    if let Some(v) = src.codebook_tx {
        dst.codebook_tx = v;
    }
    if let Some(v) = src.num_srs_resources {
        dst.num_srs_resources = v;
    }
    if let Some(v) = src.freq_hopping {
        dst.freq_hopping = v;
    }
    if let Some(v) = src.csi_request_bits {
        dst.csi_request_bits = v;
    }
    if let Some(v) = src.aperiodic_csi_bits {
        dst.aperiodic_csi_bits = v;
    }
    if let Some(v) = src.beta_offset_ack_index {
        dst.beta_offset_ack_index = v;
    }
    if let Some(v) = src.beta_offset_csi1_index {
        dst.beta_offset_csi1_index = v;
    }
    if let Some(v) = src.p0_nominal {
        dst.p0_nominal = v;
    }
    if let Some(v) = src.msg3_delta_preamble {
        dst.msg3_delta_preamble = v;
    }
    if let Some(v) = src.tpc_accumulation {
        dst.tpc_accumulation = v;
    }
}

fn apply_pucch_patch(dst: &mut CfgPucch, src: PucchDto) {
    if let Some(v) = src.common_resource_index {
        dst.common_resource_index = v;
    }
    if let Some(v) = src.resource {
        dst.resources = v;
    }
    if let Some(v) = src.resource_set {
        dst.resource_sets = v;
    }
    if let Some(v) = src.sr_resource {
        dst.sr_resources = v;
    }
    if let Some(v) = src.simultaneous_harq_ack_csi {
        dst.simultaneous_harq_ack_csi = v;
    }
    if let Some(v) = src.p0_nominal {
        dst.p0_nominal = v;
    }
    dst.hopping_id = src.hopping_id.or(dst.hopping_id);
}

fn apply_rach_patch(dst: &mut CfgRach, src: RachDto) {
    if let Some(v) = src.prach_config_index {
        dst.prach_config_index = v;
    }
    if let Some(v) = src.ro_frame_period {
        dst.ro_frame_period = v;
    }
    if let Some(v) = src.ro_frame_offset {
        dst.ro_frame_offset = v;
    }
    if let Some(v) = src.ro_slots {
        dst.ro_slots = v;
    }
    if let Some(v) = src.ro_start_symbol {
        dst.ro_start_symbol = v;
    }
    if let Some(v) = src.ros_per_slot {
        dst.ros_per_slot = v;
    }
    if let Some(v) = src.ro_duration {
        dst.ro_duration = v;
    }
    if let Some(v) = src.msg1_fdm {
        dst.msg1_fdm = v;
    }
    if let Some(v) = src.msg1_frequency_start {
        dst.msg1_frequency_start = v;
    }
    if let Some(v) = src.ssb_per_ro {
        dst.ssb_per_ro = v;
    }
    if let Some(v) = src.cb_preambles_per_ssb {
        dst.cb_preambles_per_ssb = v;
    }
    if let Some(v) = src.total_preambles {
        dst.total_preambles = v;
    }
    if let Some(v) = src.preamble_received_target_power {
        dst.preamble_received_target_power = v;
    }
    if let Some(v) = src.power_ramping_step {
        dst.power_ramping_step = v;
    }
    if let Some(v) = src.preamble_trans_max {
        dst.preamble_trans_max = v;
    }
    if let Some(v) = src.ra_response_window {
        dst.ra_response_window = v;
    }
    if let Some(v) = src.contention_resolution_timer_sf {
        dst.contention_resolution_timer_sf = v;
    }
    if let Some(v) = src.scaling_factor_bi {
        dst.scaling_factor_bi = v;
    }
    if let Some(v) = src.ul_carrier_id {
        dst.ul_carrier_id = v;
    }
    if src.cfra.is_some() {
        dst.cfra = src.cfra;
    }
}

fn apply_bsr_patch(dst: &mut CfgBsr, src: BsrDto) {
    // 0 selects infinity for the periodic timer
    if let Some(v) = src.periodic_timer_sf {
        dst.periodic_timer_sf = if v == 0 { None } else { Some(v) };
    }
    if let Some(v) = src.retx_timer_sf {
        dst.retx_timer_sf = v;
    }
    if src.sr_delay_timer_sf.is_some() {
        dst.sr_delay_timer_sf = src.sr_delay_timer_sf;
    }
}

fn apply_timing_patch(dst: &mut CfgTiming, src: TimingDto) {
    if let Some(v) = src.min_rx_to_tx_slots {
        dst.min_rx_to_tx_slots = v;
    }
    if let Some(v) = src.queue_capacity {
        dst.queue_capacity = v;
    }
}

/// ----------------------- DTOs for input shape -----------------------

#[derive(Deserialize)]
struct TomlConfigRoot {
    config_version: String,
    debug_log: Option<String>,

    #[serde(default)]
    carrier: Option<CarrierDto>,
    #[serde(default)]
    pdsch: Option<PdschDto>,
    #[serde(default)]
    pusch: Option<PuschDto>,
    #[serde(default)]
    pucch: Option<PucchDto>,
    #[serde(default)]
    rach: Option<RachDto>,
    #[serde(default)]
    bsr: Option<BsrDto>,
    #[serde(default)]
    timing: Option<TimingDto>,

    #[serde(default)]
    csi_report: Option<Vec<CfgCsiReport>>,
    #[serde(default)]
    srs_resource: Option<Vec<CfgSrsResource>>,
    #[serde(default)]
    logical_channel: Option<Vec<CfgLogicalChannel>>,
    #[serde(default)]
    scheduling_request: Option<Vec<CfgSchedulingRequest>>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct CarrierDto {
    numerology: Option<u8>,
    duplex: Option<DuplexMode>,
    tdd: Option<TddDto>,
    phys_cell_id: Option<u16>,
    dl_bwp_start: Option<u16>,
    dl_bwp_size: Option<u16>,
    ul_bwp_start: Option<u16>,
    ul_bwp_size: Option<u16>,
    coreset0_size: Option<u16>,
    num_dedicated_bwps: Option<u8>,
    ssb_positions: Option<u64>,
    ntn_koffset: Option<u16>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct TddDto {
    period_slots: u16,
    dl_slots: u16,
    ul_slots: u16,
    mixed_ul_symbols: Option<u8>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct PdschDto {
    mcs_table: Option<McsTable>,
    tdra: Option<Vec<CfgPdschTdra>>,
    dl_data_to_ul_ack: Option<Vec<u8>>,
    max_codewords: Option<u8>,
    dmrs_type: Option<u8>,
    dmrs_max_length: Option<u8>,
    dmrs_add_pos: Option<u8>,
    num_harq_processes: Option<u8>,
    tci_present: Option<bool>,
    vrb_to_prb_interleaved: Option<bool>,
    x_overhead: Option<u8>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct PuschDto {
    mcs_table: Option<McsTable>,
    transform_precoding: Option<bool>,
    tdra: Option<Vec<CfgPuschTdra>>,
    max_rank: Option<u8>,
    num_antenna_ports: Option<u8>,
    codebook_tx: Option<bool>,
    num_srs_resources: Option<u8>,
    freq_hopping: Option<bool>,
    csi_request_bits: Option<u8>,
    aperiodic_csi_bits: Option<u16>,
    beta_offset_ack_index: Option<[u8; 3]>,
    beta_offset_csi1_index: Option<u8>,
    p0_nominal: Option<i16>,
    msg3_delta_preamble: Option<i8>,
    tpc_accumulation: Option<bool>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct PucchDto {
    common_resource_index: Option<u8>,
    resource: Option<Vec<CfgPucchResource>>,
    resource_set: Option<Vec<CfgPucchResourceSet>>,
    sr_resource: Option<Vec<CfgSrResource>>,
    simultaneous_harq_ack_csi: Option<bool>,
    p0_nominal: Option<i16>,
    hopping_id: Option<u16>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct RachDto {
    prach_config_index: Option<u8>,
    ro_frame_period: Option<u8>,
    ro_frame_offset: Option<u8>,
    ro_slots: Option<Vec<u16>>,
    ro_start_symbol: Option<u8>,
    ros_per_slot: Option<u8>,
    ro_duration: Option<u8>,
    msg1_fdm: Option<u8>,
    msg1_frequency_start: Option<u16>,
    ssb_per_ro: Option<SsbPerRo>,
    cb_preambles_per_ssb: Option<u8>,
    total_preambles: Option<u8>,
    preamble_received_target_power: Option<i16>,
    power_ramping_step: Option<u8>,
    preamble_trans_max: Option<u8>,
    ra_response_window: Option<u16>,
    contention_resolution_timer_sf: Option<u16>,
    scaling_factor_bi: Option<u8>,
    ul_carrier_id: Option<u8>,
    cfra: Option<CfgCfra>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct BsrDto {
    periodic_timer_sf: Option<u32>,
    retx_timer_sf: Option<u32>,
    sr_delay_timer_sf: Option<u32>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct TimingDto {
    min_rx_to_tx_slots: Option<u8>,
    queue_capacity: Option<usize>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = from_toml_str("config_version = \"0.1\"\n").unwrap();
        assert_eq!(cfg.config().carrier.numerology, 1);
        assert_eq!(cfg.config().timing.min_rx_to_tx_slots, 1);
    }

    #[test]
    fn test_sections_are_patched() {
        let toml = r#"
            config_version = "0.1"

            [carrier]
            numerology = 0
            duplex = "Fdd"
            dl_bwp_size = 52
            ul_bwp_size = 52

            [pdsch]
            dl_data_to_ul_ack = [4, 5]

            [pucch]
            simultaneous_harq_ack_csi = false

            [[logical_channel]]
            lcid = 4
            lcg = 1
            priority = 3
            pbr_kbytes = 16
        "#;
        let cfg = from_toml_str(toml).unwrap().config();
        assert!(cfg.carrier.tdd.is_none());
        assert_eq!(cfg.carrier.dl_bwp_size, 52);
        assert_eq!(cfg.pdsch.dl_data_to_ul_ack, vec![4, 5]);
        assert!(!cfg.pucch.simultaneous_harq_ack_csi);
        assert_eq!(cfg.logical_channels.len(), 1);
        assert_eq!(cfg.logical_channels[0].pbr_kbytes, Some(16));
        assert_eq!(cfg.logical_channels[0].bucket_size_duration_ms, 100);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = from_toml_str("config_version = \"0.1\"\n[rach]\nfoo = 1\nbar = 2\n").err().unwrap();
        assert!(err.to_string().contains("[\"bar\", \"foo\"]"));
    }

    #[test]
    fn test_wrong_version_rejected() {
        assert!(from_toml_str("config_version = \"0.5\"\n").is_err());
    }
}
