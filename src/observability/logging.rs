//! Logging initialization.
//!
//! `tracing` events go to stderr, leaving stdout to the JSONL event stream.
//! `-v` raises the level of this crate only; dependencies stay at `warn`
//! unless `TRAFFICMIND_LOG_LEVEL` supplies a full `EnvFilter` directive.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::uptime;

use crate::cli::args::ColorChoice;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_LEVEL_ENV: &str = "TRAFFICMIND_LOG_LEVEL";

/// Log output format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact lines stamped with time since start.
    #[default]
    Human,
    /// One flattened JSON object per event.
    Json,
}

/// Level name for a `-v` count: warn, info, debug, then trace.
#[must_use]
pub const fn verbosity_to_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Directive used when `TRAFFICMIND_LOG_LEVEL` is unset.
fn default_directive(verbosity: u8) -> String {
    format!(
        "warn,{}={}",
        env!("CARGO_CRATE_NAME"),
        verbosity_to_directive(verbosity)
    )
}

fn use_ansi(color: ColorChoice) -> bool {
    match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    }
}

/// Installs the global subscriber. Later calls are no-ops (`try_init`).
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    // Module paths only help once someone is debugging
    let show_target = verbosity >= 2;

    match format {
        LogFormat::Human => {
            let _ = tracing_subscriber::fmt()
                .compact()
                .with_timer(uptime())
                .with_env_filter(filter)
                .with_ansi(use_ansi(color))
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_env_filter(filter)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
