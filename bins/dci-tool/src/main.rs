use clap::Parser;

use nr_config::{SharedConfig, UeMacConfig, toml_config};
use nr_core::{BitBuffer, RntiType};
use nr_entities::mac::dci::{self, DciSizes};
use nr_saps::phy_mac::{CoresetType, DciFormatGroup, SearchSpaceType};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "NR DCI Decoder",
    long_about = "Decodes a raw DCI bitstring received with the given RNTI type and prints its fields"
)]
struct Args {
    #[arg(help = "RNTI type: [ c | tc | ra | si ]")]
    rnti_type: String,

    #[arg(help = "Raw DCI payload bits, without CRC")]
    bitstring: String,

    #[arg(short = 'f', long = "format", default_value = "fallback", help = "Size class: [ fallback | nonfallback ]")]
    format: String,

    #[arg(short = 's', long = "search-space", default_value = "common", help = "Search space: [ common | ue ]")]
    search_space: String,

    #[arg(long = "dedicated-coreset", help = "Received in a dedicated CORESET instead of CORESET 0")]
    dedicated_coreset: bool,

    #[arg(short = 'c', long = "config", help = "TOML config with the BWP and channel configuration")]
    config: Option<String>,
}

fn main() {
    eprintln!("[+] NR DCI decoding tool");

    let args = Args::parse();

    let rnti_type = match args.rnti_type.to_lowercase().as_str() {
        "c" | "c-rnti" => RntiType::C,
        "tc" | "tc-rnti" => RntiType::Tc,
        "ra" | "ra-rnti" => RntiType::Ra,
        "si" | "si-rnti" => RntiType::Si,
        "p" | "p-rnti" => RntiType::P,
        _ => {
            eprintln!("Error: Unsupported RNTI type '{}'. Use: c, tc, ra, si", args.rnti_type);
            std::process::exit(1);
        }
    };

    let group = match args.format.to_lowercase().as_str() {
        "fallback" | "0_0" | "1_0" => DciFormatGroup::Fallback,
        "nonfallback" | "0_1" | "1_1" => DciFormatGroup::NonFallback,
        _ => {
            eprintln!("Error: Unsupported format '{}'. Use: fallback, nonfallback", args.format);
            std::process::exit(1);
        }
    };

    let ss_type = match args.search_space.to_lowercase().as_str() {
        "common" | "css" => SearchSpaceType::Common,
        "ue" | "uss" => SearchSpaceType::UeSpecific,
        _ => {
            eprintln!("Error: Unsupported search space '{}'. Use: common, ue", args.search_space);
            std::process::exit(1);
        }
    };
    let coreset = if args.dedicated_coreset { CoresetType::Dedicated } else { CoresetType::Coreset0 };

    let cfg = match &args.config {
        Some(path) => match toml_config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => SharedConfig::from_config(UeMacConfig::default()),
    }
    .config();

    if args.bitstring.chars().any(|c| c != '0' && c != '1') {
        eprintln!("Error: bitstring may only contain 0 and 1");
        std::process::exit(1);
    }
    let payload = BitBuffer::from_bitstr(&args.bitstring);
    let sizes = DciSizes::new(&cfg, ss_type, coreset);

    let kind = match dci::classify(rnti_type, group, &payload, &sizes) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let fields = match dci::decode(kind, &sizes, &payload) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("{} {:?}, {} bits, {} payload bits", rnti_type, kind, payload.get_len(), sizes.payload_size(kind));
    for field in kind.layout() {
        let width = sizes.width(kind, *field);
        if width > 0 {
            println!("  {:<16} {:>2} bits  {}", format!("{:?}", field), width, fields.get(*field));
        }
    }
}
