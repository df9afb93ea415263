//! CLI argument definitions
//!
//! All Clap derive structs for `trafficmind` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;
use crate::strategy::StrategyKind;

// ============================================================================
// Root CLI
// ============================================================================

/// Adaptive traffic signal controller.
#[derive(Parser, Debug)]
#[command(name = "trafficmind", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "TRAFFICMIND_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "TRAFFICMIND_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller, reading observations as NDJSON from stdin.
    Run(RunArgs),

    /// Validate a configuration file without running.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to YAML configuration file (defaults apply when omitted).
    #[arg(short, long, env = "TRAFFICMIND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Strategy to start with, overriding `supervisor.initial_strategy`.
    #[arg(short, long, env = "TRAFFICMIND_STRATEGY")]
    pub strategy: Option<StrategyKind>,

    /// Signal link address, overriding `hardware.port` and enabling hardware.
    ///
    /// A device path, `serial:<path>`, `tcp://host:port`, or `emulate`.
    #[arg(short, long, env = "TRAFFICMIND_PORT")]
    pub port: Option<String>,

    /// Run software-only even if the configuration enables hardware.
    #[arg(long, conflicts_with = "port")]
    pub no_hardware: bool,

    /// Do not read observations from stdin.
    #[arg(long)]
    pub no_feed: bool,

    /// Write JSONL events to this file instead of stdout.
    #[arg(long, env = "TRAFFICMIND_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Expose Prometheus metrics on `127.0.0.1:<port>`.
    #[arg(long, env = "TRAFFICMIND_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration file to validate.
    pub config: PathBuf,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

// ============================================================================
// Tests
// ============================================================================
