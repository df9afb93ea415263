//! Phase state machine
//!
//! Owns the authoritative signal phase. Strategies can only *request* a
//! green axis; the machine decides whether the request is legal and runs
//! the clearance sequence (yellow, then all-red) on elapsed time alone.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::schema::TimingConfig;
use crate::error::TransitionRejected;
use crate::intersection::Axis;

use super::state::{Phase, PhaseState, PhaseTransition, TransitionReason};

/// Durations the state machine enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Minimum time a green must hold before an unforced switch
    pub min_green: Duration,
    /// Yellow clearance interval
    pub yellow: Duration,
    /// All-red clearance interval
    pub all_red: Duration,
}

impl From<&TimingConfig> for PhaseTimings {
    fn from(cfg: &TimingConfig) -> Self {
        Self {
            min_green: cfg.min_green,
            yellow: cfg.yellow,
            all_red: cfg.all_red,
        }
    }
}

/// Result of an accepted [`PhaseMachine::request_phase`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The requested axis is already green
    Unchanged,
    /// A clearance sequence is running; the request was ignored
    Busy,
    /// The target was recorded and will be shown once all-red has held
    Scheduled,
    /// The request caused a transition right away
    Started(PhaseTransition),
}

/// Phase state machine.
///
/// Starts in [`Phase::AllRed`] with no target. Every transition goes
/// through [`enter`](Self::enter), which is the only place `current`
/// changes.
#[derive(Debug)]
pub struct PhaseMachine {
    timings: PhaseTimings,
    current: Phase,
    entered_at: Instant,
    pending: Option<Axis>,
    transitions: u64,
}

impl PhaseMachine {
    /// Creates a machine in the initial all-red state, entered at `now`.
    #[must_use]
    pub const fn new(timings: PhaseTimings, now: Instant) -> Self {
        Self {
            timings,
            current: Phase::AllRed,
            entered_at: now,
            pending: None,
            transitions: 0,
        }
    }

    /// Returns the phase currently shown.
    #[must_use]
    pub const fn current(&self) -> Phase {
        self.current
    }

    /// Returns a snapshot of the machine as seen at `now`.
    #[must_use]
    pub fn state(&self, now: Instant) -> PhaseState {
        PhaseState {
            current: self.current,
            entered_at: self.entered_at,
            time_in_phase: now.saturating_duration_since(self.entered_at),
            pending: self.pending,
            transitions: self.transitions,
        }
    }

    /// Requests that `target` become the green axis.
    ///
    /// From a green, a switch starts the clearance sequence by entering
    /// yellow. `force` skips only the minimum-dwell check; it never
    /// shortens yellow or all-red. During clearance every request is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionRejected::TooEarly`] if the current green has
    /// not held for the minimum dwell and `force` is `false`.
    pub fn request_phase(
        &mut self,
        target: Axis,
        force: bool,
        now: Instant,
    ) -> Result<RequestOutcome, TransitionRejected> {
        match self.current.green_axis() {
            Some(axis) if axis == target => Ok(RequestOutcome::Unchanged),
            Some(_) => {
                let held = now.saturating_duration_since(self.entered_at);
                if !force && held < self.timings.min_green {
                    return Err(TransitionRejected::TooEarly {
                        held,
                        min: self.timings.min_green,
                    });
                }
                self.pending = Some(target);
                let reason = if force {
                    TransitionReason::Forced
                } else {
                    TransitionReason::Requested
                };
                Ok(RequestOutcome::Started(
                    self.enter(Phase::AllYellow, now, reason),
                ))
            }
            None if self.pending.is_some() => {
                debug!(
                    current = %self.current,
                    requested = %target,
                    "clearance in progress; request ignored"
                );
                Ok(RequestOutcome::Busy)
            }
            None => {
                // Idle initial all-red: honour the all-red hold from boot.
                self.pending = Some(target);
                Ok(self
                    .advance(now)
                    .map_or(RequestOutcome::Scheduled, RequestOutcome::Started))
            }
        }
    }

    /// Runs the time-driven part of the clearance sequence.
    ///
    /// Performs at most one transition per call. The new phase is entered at
    /// `now`, so a late call can only lengthen a clearance interval.
    pub fn advance(&mut self, now: Instant) -> Option<PhaseTransition> {
        let held = now.saturating_duration_since(self.entered_at);
        match self.current {
            Phase::AllYellow if held >= self.timings.yellow => {
                Some(self.enter(Phase::AllRed, now, TransitionReason::YellowElapsed))
            }
            Phase::AllRed if held >= self.timings.all_red => {
                let target = self.pending.take()?;
                Some(self.enter(
                    Phase::green(target),
                    now,
                    TransitionReason::AllRedElapsed,
                ))
            }
            _ => None,
        }
    }

    fn enter(&mut self, to: Phase, now: Instant, reason: TransitionReason) -> PhaseTransition {
        let from = self.current;
        self.current = to;
        self.entered_at = now;
        self.transitions = self.transitions.saturating_add(1);

        info!(%from, %to, %reason, "phase transition");

        PhaseTransition {
            from,
            to,
            at: now,
            reason,
        }
    }
}
