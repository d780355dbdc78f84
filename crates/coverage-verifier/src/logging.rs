//! Tracing subscriber setup.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::options::InstrumentLogOptions;

/// Level named by `level`; unknown or absent names turn logging off.
pub fn level_filter(level: Option<&str>) -> LevelFilter {
    match level.map(str::to_ascii_lowercase).as_deref() {
        Some("error") => LevelFilter::ERROR,
        Some("warn") => LevelFilter::WARN,
        Some("info") => LevelFilter::INFO,
        Some("debug") => LevelFilter::DEBUG,
        Some("trace") => LevelFilter::TRACE,
        _ => LevelFilter::OFF,
    }
}

/// Install a global fmt subscriber for `options`.
///
/// `RUST_LOG` overrides the configured level. Returns `false` when a
/// subscriber was already installed, which leaves that one in place.
pub fn init(options: &InstrumentLogOptions) -> bool {
    let level = level_filter(options.level.as_deref());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    let span_events = if options.enable_trace {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .pretty()
        .try_init()
        .is_ok()
}
