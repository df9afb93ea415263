//! Phase state machine
//!
//! Owns the signal phase shown at the intersection and enforces legal
//! sequencing: minimum green dwell, then yellow, then all-red, then the
//! opposite green.
//!
//! # Architecture
//!
//! - [`Phase`] / [`PhaseState`]: the phase and its immutable snapshot
//! - [`PhaseMachine`]: the only writer of phase state
//! - [`PhaseTransition`]: record of each completed transition, the unit the
//!   actuation bridge observes

pub mod machine;
pub mod state;

pub use machine::{PhaseMachine, PhaseTimings, RequestOutcome};
pub use state::{Phase, PhaseState, PhaseTransition, TransitionReason};
