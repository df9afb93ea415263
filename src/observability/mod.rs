//! Observability: logging, metrics and structured events.
//!
//! Logs go to stderr through `tracing`. Metrics are recorded through the
//! `metrics` facade and optionally exported for Prometheus. Events are
//! JSONL records of discrete controller state changes.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventEmitter, RunSummary, StopReason};
pub use logging::{LogFormat, init_logging, verbosity_to_directive};
pub use metrics::init_metrics;
