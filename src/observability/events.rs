//! Structured event stream.
//!
//! Discrete, typed controller events serialized as newline-delimited JSON
//! (JSONL). Each line carries a monotonically increasing sequence number so
//! consumers can detect gaps and order events.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bridge::HardwareSync;
use crate::intersection::{Axis, Direction};
use crate::phase::{Phase, TransitionReason};
use crate::strategy::{DecisionSource, StrategyKind};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Why the controller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Cancelled by the embedding application.
    Cancelled,
    /// Interrupted by SIGINT.
    Interrupted,
    /// Terminated by SIGTERM.
    Terminated,
}

/// Summary statistics emitted when the controller stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Ticks executed.
    pub ticks: u64,
    /// Completed phase transitions.
    pub phase_transitions: u64,
    /// Strategy faults handled by the supervisor.
    pub strategy_faults: u64,
    /// Emergency overrides activated.
    pub overrides: u64,
    /// Uptime in seconds.
    pub uptime_secs: f64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ticks={} transitions={} faults={} overrides={} uptime={:.1}s",
            self.ticks,
            self.phase_transitions,
            self.strategy_faults,
            self.overrides,
            self.uptime_secs,
        )
    }
}

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted by the controller.
///
/// Each variant is tagged with `"type"` when serialized to JSON so consumers
/// can dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The decision loop started.
    ControllerStarted {
        /// When the controller started.
        timestamp: DateTime<Utc>,
        /// Strategy selected at startup.
        strategy: StrategyKind,
        /// Tick period in milliseconds.
        tick_ms: u64,
        /// Whether a hardware link is attached.
        hardware: bool,
    },

    /// The decision loop stopped.
    ControllerStopped {
        /// When the controller stopped.
        timestamp: DateTime<Utc>,
        /// Why it stopped.
        reason: StopReason,
        /// Run summary statistics.
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<RunSummary>,
    },

    /// The phase state machine entered a new phase.
    PhaseEntered {
        /// When the transition occurred.
        timestamp: DateTime<Utc>,
        /// Tick on which it occurred.
        tick: u64,
        /// Phase left.
        from: Phase,
        /// Phase entered.
        to: Phase,
        /// What caused the transition.
        reason: TransitionReason,
    },

    /// The requested axis or its source changed.
    DecisionChanged {
        /// When the decision was made.
        timestamp: DateTime<Utc>,
        /// Tick on which it was made.
        tick: u64,
        /// Requested green axis.
        target: Axis,
        /// Who decided.
        source: DecisionSource,
        /// Confidence in `[0, 1]`.
        confidence: f32,
    },

    /// A strategy was selected.
    StrategySelected {
        /// When the selection took effect.
        timestamp: DateTime<Utc>,
        /// Newly selected strategy.
        strategy: StrategyKind,
        /// Strategy actually running (Timer while demoted).
        active: StrategyKind,
    },

    /// A strategy failed or exceeded its budget.
    StrategyFault {
        /// When the fault was detected.
        timestamp: DateTime<Utc>,
        /// Tick on which it occurred.
        tick: u64,
        /// Failing strategy.
        strategy: StrategyKind,
        /// Error description.
        error: String,
    },

    /// The supervisor demoted to the fallback strategy.
    StrategyDemoted {
        /// When the demotion happened.
        timestamp: DateTime<Utc>,
        /// Tick on which it happened.
        tick: u64,
        /// Strategy demoted from.
        from: StrategyKind,
        /// Strategy now running.
        to: StrategyKind,
    },

    /// Fallback was cleared and the selected strategy resumed.
    FallbackReset {
        /// When the reset happened.
        timestamp: DateTime<Utc>,
        /// Strategy resumed.
        strategy: StrategyKind,
    },

    /// An emergency override activated.
    OverrideActivated {
        /// When the override activated.
        timestamp: DateTime<Utc>,
        /// Tick on which it activated.
        tick: u64,
        /// Direction reporting the emergency vehicle.
        direction: Direction,
        /// Axis forced green.
        axis: Axis,
    },

    /// An emergency override cleared.
    OverrideCleared {
        /// When the override cleared.
        timestamp: DateTime<Utc>,
        /// Tick on which it cleared.
        tick: u64,
        /// Direction the override last served.
        direction: Direction,
        /// Consecutive quiet ticks observed.
        quiet_ticks: u32,
    },

    /// The hardware link changed state.
    HardwareSyncChanged {
        /// When the change was observed.
        timestamp: DateTime<Utc>,
        /// New status.
        status: HardwareSync,
        /// Error that caused degradation, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A sensor read-back line was discarded.
    SensorFrameRejected {
        /// When the line was received.
        timestamp: DateTime<Utc>,
        /// The offending line (trimmed).
        line: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl Event {
    /// Serialized `type` tag of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ControllerStarted { .. } => "ControllerStarted",
            Self::ControllerStopped { .. } => "ControllerStopped",
            Self::PhaseEntered { .. } => "PhaseEntered",
            Self::DecisionChanged { .. } => "DecisionChanged",
            Self::StrategySelected { .. } => "StrategySelected",
            Self::StrategyFault { .. } => "StrategyFault",
            Self::StrategyDemoted { .. } => "StrategyDemoted",
            Self::FallbackReset { .. } => "FallbackReset",
            Self::OverrideActivated { .. } => "OverrideActivated",
            Self::OverrideCleared { .. } => "OverrideCleared",
            Self::HardwareSyncChanged { .. } => "HardwareSyncChanged",
            Self::SensorFrameRejected { .. } => "SensorFrameRejected",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with a monotonically increasing sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    /// Zero-based, monotonically increasing sequence counter.
    sequence: u64,
    /// The wrapped event (flattened into the same JSON object).
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) increments the sequence counter,
/// serializes the event as a single JSON line, and flushes. Serialization
/// and I/O failures are dropped; observability never stops the signals.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

// Box<dyn Write> is not Debug
impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    ///
    /// The default for `run`: logs go to stderr, events to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that silently discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that appends to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Flushes the underlying writer.
    pub fn flush(&self) {
        if let Ok(mut w) = self.writer.lock() {
            let _ = w.flush();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
