use clap::Parser;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nr_config::{SharedConfig, UeMacConfig, toml_config};
use nr_core::{NrEntity, SlotTime, debug};
use nr_entities::MessageRouter;
use nr_entities::mac::rlc_if::{LoopbackRlc, RlcHandle};
use nr_entities::mac::ue_mac::UeMac;
use nr_entities::phy::{GnbCommand, GnbHandle, PhyEmu};

/// Load configuration file, or the built-in defaults without one
fn load_config(cfg_path: Option<&str>) -> SharedConfig {
    let Some(cfg_path) = cfg_path else {
        return SharedConfig::from_config(UeMacConfig::default());
    };
    match toml_config::from_file(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to load configuration from {}: {}", cfg_path, e);
            std::process::exit(1);
        }
    }
}

/// UE MAC on top of the emulated PHY and cell
fn build_ue_stack(cfg: &SharedConfig) -> (MessageRouter, GnbHandle, RlcHandle) {
    let mut router = MessageRouter::new(cfg.clone());

    let (phy, gnb) = PhyEmu::new(cfg.clone());
    let (rlc, rlc_handle) = LoopbackRlc::new();
    let mac = UeMac::new(cfg.clone(), Box::new(rlc));
    router.register_entity(Box::new(phy));
    router.register_entity(Box::new(mac));

    router.set_dl_time(SlotTime::new(0, 0, cfg.config().carrier.numerology));
    (router, gnb, rlc_handle)
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "NR UE MAC scheduler",
    long_about = "Runs the NR UE MAC against an emulated PHY and cell, using the provided TOML configuration"
)]
struct Args {
    /// Config file
    #[arg(help = "TOML config with carrier, channel and logical channel parameters")]
    config: Option<String>,

    /// Number of slots to run, runs until Ctrl+C without
    #[arg(short = 'n', long = "slots")]
    slots: Option<usize>,

    /// Logical channel for generated traffic
    #[arg(long = "lcid", default_value_t = 4)]
    lcid: u8,

    /// Bytes queued for UL transmission at start-up
    #[arg(long = "ul-bytes", default_value_t = 0)]
    ul_bytes: usize,

    /// Bytes the cell sends in DL once the UE is connected
    #[arg(long = "dl-bytes", default_value_t = 0)]
    dl_bytes: usize,
}

fn main() {
    eprintln!("[+] NR UE MAC");

    let args = Args::parse();
    let cfg = load_config(args.config.as_deref());
    let _log_guard = debug::setup_logging_default(cfg.config().debug_log.clone());

    let (mut router, gnb, rlc) = build_ue_stack(&cfg);
    if args.ul_bytes > 0 {
        rlc.send(args.lcid, (0..args.ul_bytes).map(|i| i as u8).collect());
    }
    if args.dl_bytes > 0 {
        gnb.send(GnbCommand::SendDl { lcid: args.lcid, data: vec![0xa5; args.dl_bytes] });
    }

    // Set up Ctrl+C handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    router.run_stack(args.slots, Some(running));

    let state = cfg.state_read().clone();
    eprintln!(" -> state {:?}, c-rnti {:?}", state.mac_state, state.crnti);
    let received: usize = rlc.received().iter().map(|(_, sdu)| sdu.len()).sum();
    eprintln!(" -> {} bytes delivered to RLC", received);
    if let Some(phy) = router.get_entity(NrEntity::Phy).and_then(|e| e.as_any_mut().downcast_mut::<PhyEmu>()) {
        let stats = &phy.gnb().stats;
        let ul_bytes: usize = stats.ul_sdus.iter().map(|(_, sdu)| sdu.len()).sum();
        eprintln!(
            " -> cell saw {} PRACH, {} PUSCH, {} PUCCH, {} SRS, {} UL SDU bytes",
            stats.prach.len(),
            stats.pusch.len(),
            stats.pucch.len(),
            stats.srs.len(),
            ul_bytes
        );
    }
}
