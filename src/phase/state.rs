//! Phase state representation
//!
//! The signal phase shown to all four approaches, plus the immutable
//! snapshot of the state machine handed to strategies and the bridge.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::intersection::Axis;

/// Aggregate signal state shown to every approach at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// North/South green, East/West red
    NsGreen,
    /// East/West green, North/South red
    EwGreen,
    /// All approaches yellow (clearance)
    AllYellow,
    /// All approaches red (clearance, and the initial state)
    AllRed,
}

impl Phase {
    /// Green phase for the given axis.
    #[must_use]
    pub const fn green(axis: Axis) -> Self {
        match axis {
            Axis::NorthSouth => Self::NsGreen,
            Axis::EastWest => Self::EwGreen,
        }
    }

    /// Axis currently holding right-of-way, or `None` during clearance.
    #[must_use]
    pub const fn green_axis(self) -> Option<Axis> {
        match self {
            Self::NsGreen => Some(Axis::NorthSouth),
            Self::EwGreen => Some(Axis::EastWest),
            Self::AllYellow | Self::AllRed => None,
        }
    }

    /// Returns `true` for the two transient clearance phases.
    #[must_use]
    pub const fn is_clearance(self) -> bool {
        matches!(self, Self::AllYellow | Self::AllRed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NsGreen => "NS_GREEN",
            Self::EwGreen => "EW_GREEN",
            Self::AllYellow => "ALL_YELLOW",
            Self::AllRed => "ALL_RED",
        };
        f.write_str(name)
    }
}

/// Snapshot of the phase state machine at a given instant.
///
/// Only [`PhaseMachine`](super::PhaseMachine) produces these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseState {
    /// Phase currently shown
    pub current: Phase,
    /// When `current` was entered (the last transition)
    pub entered_at: Instant,
    /// How long `current` has been shown at snapshot time
    pub time_in_phase: Duration,
    /// Green the clearance sequence is heading to, if any
    pub pending: Option<Axis>,
    /// Number of completed transitions since start
    pub transitions: u64,
}

impl PhaseState {
    /// Axis of the current green, if any.
    #[must_use]
    pub const fn green_axis(&self) -> Option<Axis> {
        self.current.green_axis()
    }

    /// Axis the intersection is showing or heading to.
    #[must_use]
    pub fn committed_axis(&self) -> Option<Axis> {
        self.green_axis().or(self.pending)
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// A green-to-green request started the clearance sequence
    Requested,
    /// A forced (override) request started the clearance sequence
    Forced,
    /// Yellow interval elapsed
    YellowElapsed,
    /// All-red interval elapsed
    AllRedElapsed,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Forced => "forced",
            Self::YellowElapsed => "yellow_elapsed",
            Self::AllRedElapsed => "all_red_elapsed",
        };
        f.write_str(name)
    }
}

/// Record of a completed phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    /// Phase we left
    pub from: Phase,
    /// Phase we entered
    pub to: Phase,
    /// When the transition happened
    pub at: Instant,
    /// What caused it
    pub reason: TransitionReason,
}
