use core::fmt;
use std::fs::OpenOptions;
use std::sync::Once;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tracingfmt, EnvFilter};

#[macro_export]
macro_rules! unimplemented_log {
    ( $($arg:tt)* ) => {{
        tracing::warn!("unimplemented: {}", format_args!($($arg)*));
    }};
}

/// Width of the "LEVEL ts [crate/module] file:line:" column
const LOCATION_COLUMN: usize = 72;

/// Blank stand-in for events logged without a `ts` field
const NO_TS: &str = "       ";

struct AlignedFormatter;

/// Pulls the optional `ts` (slot time) field out of an event
struct TsVisitor {
    ts: Option<String>,
}

impl tracing::field::Visit for TsVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "ts" {
            self.ts = Some(format!("{:?}", value));
        }
    }
}

/// "crates/nr-entities/src/mac/harq.rs" becomes "[entities/mac] harq.rs"
fn short_location(file_path: &str) -> String {
    let Some(src_idx) = file_path.find("/src/") else {
        return file_path.to_string();
    };
    let before_src = &file_path[..src_idx];
    let after_src = &file_path[src_idx + 5..];

    let crate_dir = before_src.rsplit('/').next().unwrap_or("unknown");
    let crate_name = crate_dir.strip_prefix("nr-").unwrap_or(crate_dir);

    match after_src.rfind('/') {
        Some(last_slash) => {
            let first_module = after_src[..last_slash].split('/').next().unwrap_or("");
            format!("[{}/{}] {}", crate_name, first_module, &after_src[last_slash + 1..])
        }
        None => format!("[{}] {}", crate_name, after_src),
    }
}

impl<S, N> FormatEvent<S, N> for AlignedFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let mut visitor = TsVisitor { ts: None };
        event.record(&mut visitor);
        let has_ts = visitor.ts.is_some();
        let ts_str = visitor.ts.unwrap_or_else(|| NO_TS.to_string());

        let color = match *metadata.level() {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            tracing::Level::DEBUG => "\x1b[34m",
            tracing::Level::TRACE => "\x1b[35m",
        };

        let location = format!(
            "{}{:<5}\x1b[0m {} {}:{}:",
            color,
            metadata.level(),
            ts_str,
            short_location(metadata.file().unwrap_or("unknown")),
            metadata.line().unwrap_or(0)
        );

        let mut message_buf = String::new();
        ctx.field_format().format_fields(format::Writer::new(&mut message_buf), event)?;

        // The ts value already went into the location column
        if has_ts {
            if let Some(ts_idx) = message_buf.find("ts=") {
                match message_buf[ts_idx..].find(' ') {
                    Some(space_idx) => message_buf.replace_range(ts_idx..ts_idx + space_idx + 1, ""),
                    None => message_buf.truncate(ts_idx),
                }
            }
        }

        // Messages announcing a sent/received primitive sit slightly left
        let mut padding = LOCATION_COLUMN;
        if message_buf.starts_with("->") || message_buf.starts_with("<-") {
            padding -= 3;
        }

        write!(writer, "{:<width$} {}", location, message_buf, width = padding)?;
        writeln!(writer)
    }
}

static INIT_LOG: Once = Once::new();

fn directive(s: &str) -> tracing_subscriber::filter::Directive {
    // Only called with literals below
    s.parse().unwrap_or_else(|e| panic!("bad log directive {}: {}", s, e))
}

/// Sets up logging with maximum verbosity (trace level)
/// Mainly for unit tests
pub fn setup_logging_verbose() {
    setup_logging(EnvFilter::new("trace"), None);
}

/// Sets up default logging to stdout and optionally, a verbose log file
/// Returns a guard, that needs to be kept alive for logging to file to work
pub fn setup_logging_default(verbose_logfile: Option<String>) -> Option<WorkerGuard> {
    let logfile_and_filter = verbose_logfile.map(|file| (file, get_default_logfile_filter()));
    setup_logging(get_default_stdout_filter(), logfile_and_filter)
}

pub fn get_default_stdout_filter() -> EnvFilter {
    EnvFilter::new("info")
        // Per-slot chatter from the lower layers
        .add_directive(directive("nr_entities::messagerouter=warn"))
        .add_directive(directive("nr_core::bitbuffer=warn"))
        .add_directive(directive("nr_entities::phy=info"))

        // Mac sub-components
        .add_directive(directive("nr_entities::mac::dci=info"))
        .add_directive(directive("nr_entities::mac::harq=info"))
        .add_directive(directive("nr_entities::mac::slot_queue=info"))
        .add_directive(directive("nr_entities::mac::pucch=info"))
        .add_directive(directive("nr_entities::mac::lcp=info"))
        .add_directive(directive("nr_entities::mac::ra=debug"))
        .add_directive(directive("nr_entities::mac::ue_mac=debug"))
}

fn get_default_logfile_filter() -> EnvFilter {
    EnvFilter::new("debug")
}

/// Sets up logging to stdout and optionally, a verbose log file
/// If an output file is requested, returns Some<WorkerGuard>. Keep this value alive
/// or logging to file may cease working.
fn setup_logging(stdout_filter: EnvFilter, outfile: Option<(String, EnvFilter)>) -> Option<WorkerGuard> {
    let Some((outfile, outfile_filter)) = outfile else {
        INIT_LOG.call_once(|| {
            let stdout_layer = tracingfmt::layer().event_format(AlignedFormatter);
            tracing_subscriber::registry()
                .with(stdout_layer.with_filter(stdout_filter))
                .init();
        });
        return None;
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&outfile)
        .unwrap_or_else(|e| panic!("Failed to open log file {}: {}", outfile, e));
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    INIT_LOG.call_once(|| {
        let file_layer = tracingfmt::layer()
            .event_format(AlignedFormatter)
            .with_writer(file_writer)
            .with_ansi(false);
        let stdout_layer = tracingfmt::layer().event_format(AlignedFormatter);

        tracing_subscriber::registry()
            .with(file_layer.with_filter(outfile_filter))
            .with(stdout_layer.with_filter(stdout_filter))
            .init();
    });

    Some(guard)
}
