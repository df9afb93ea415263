//! Decision strategies
//!
//! Every tick the active strategy maps a [`TickSnapshot`] to a requested
//! green [`Axis`]. Strategies never see the phase machine itself, only the
//! immutable [`PhaseState`] inside the snapshot.
//!
//! # Architecture
//!
//! - [`DecisionStrategy`]: the one contract every strategy implements
//! - [`TimerStrategy`]: fixed cycle, also the supervisor's fallback
//! - [`RuleBasedStrategy`]: queue/wait pressure heuristic
//! - [`LearnedPolicyStrategy`]: opaque [`PolicyModel`] on a blocking thread

pub mod learned;
pub mod model;
pub mod rule_based;
pub mod timer;

pub use learned::LearnedPolicyStrategy;
pub use model::{FeatureScales, FeatureVector, MlpPolicy, PolicyAction, PolicyModel, PolicyOutput};
pub use rule_based::RuleBasedStrategy;
pub use timer::TimerStrategy;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::StrategyError;
use crate::intersection::{ApproachObservation, Axis};
use crate::phase::PhaseState;

/// Strategy identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Fixed-cycle timer
    Timer,
    /// Queue/wait pressure heuristic
    RuleBased,
    /// Learned policy model
    LearnedPolicy,
}

impl StrategyKind {
    /// Stable name used in logs, events and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::RuleBased => "rule-based",
            Self::LearnedPolicy => "learned-policy",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "strategy")]
pub enum DecisionSource {
    /// The selected strategy, running normally
    Strategy(StrategyKind),
    /// Timer fallback after a strategy fault
    Fallback,
    /// Emergency override
    Override,
}

impl DecisionSource {
    /// Metric label for this source.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Strategy(kind) => kind.as_str(),
            Self::Fallback => "fallback",
            Self::Override => "override",
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A requested green axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    /// Axis to show green
    pub target: Axis,
    /// Who decided
    pub source: DecisionSource,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    /// Skip the minimum-dwell check (emergency override only)
    pub force: bool,
}

impl Decision {
    /// A normal strategy decision.
    #[must_use]
    pub fn new(target: Axis, kind: StrategyKind, confidence: f32) -> Self {
        Self {
            target,
            source: DecisionSource::Strategy(kind),
            confidence: clamp_unit(confidence),
            force: false,
        }
    }

    /// The override decision: `axis` green, forced.
    #[must_use]
    pub const fn emergency(axis: Axis) -> Self {
        Self {
            target: axis,
            source: DecisionSource::Override,
            confidence: 1.0,
            force: true,
        }
    }

    /// Re-tags this decision as a fallback.
    #[must_use]
    pub const fn into_fallback(self) -> Self {
        Self {
            source: DecisionSource::Fallback,
            force: false,
            ..self
        }
    }
}

/// Immutable per-tick input handed to a strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSnapshot {
    /// Tick number since start
    pub tick: u64,
    /// Instant the tick fired
    pub at: Instant,
    /// Merged observations in [`Direction::ALL`](crate::intersection::Direction::ALL) order
    pub observations: [ApproachObservation; 4],
    /// Phase state at `at`
    pub phase: PhaseState,
}

/// Contract every decision strategy implements.
///
/// `decide` receives a shared snapshot and returns a fresh [`Decision`]; it
/// cannot touch phase state. The supervisor bounds every call with its
/// per-tick budget, so implementations need not time themselves out.
#[async_trait::async_trait]
pub trait DecisionStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Picks the axis to request for this tick.
    async fn decide(&self, snapshot: &TickSnapshot) -> Result<Decision, StrategyError>;
}

/// Returns the opposite axis once the current green has held for
/// `max_green`, otherwise `None`.
pub(crate) fn max_green_override(phase: &PhaseState, max_green: Duration) -> Option<Axis> {
    let green = phase.green_axis()?;
    (phase.time_in_phase >= max_green).then(|| green.other())
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::TickSnapshot;
    use crate::intersection::{ApproachObservation, Axis};
    use crate::phase::{Phase, PhaseState};

    pub(crate) fn obs(queue: u32, wait_secs: u64) -> ApproachObservation {
        ApproachObservation {
            queue_length: queue,
            wait_time: Duration::from_secs(wait_secs),
            ..Default::default()
        }
    }

    pub(crate) fn snapshot_with(
        at: Instant,
        observations: [ApproachObservation; 4],
        current: Phase,
        time_in_phase: Duration,
        pending: Option<Axis>,
    ) -> TickSnapshot {
        TickSnapshot {
            tick: 1,
            at,
            observations,
            phase: PhaseState {
                current,
                entered_at: at.checked_sub(time_in_phase).unwrap_or(at),
                time_in_phase,
                pending,
                transitions: 1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::phase::Phase;

    #[test]
    fn test_strategy_kind_names() {
        assert_eq!(StrategyKind::Timer.to_string(), "timer");
        assert_eq!(StrategyKind::RuleBased.to_string(), "rule-based");
        assert_eq!(StrategyKind::LearnedPolicy.to_string(), "learned-policy");
        let parsed: StrategyKind = serde_json::from_str("\"learned-policy\"").unwrap();
        assert_eq!(parsed, StrategyKind::LearnedPolicy);
    }

    #[test]
    fn test_emergency_decision_is_forced() {
        let d = Decision::emergency(Axis::EastWest);
        assert!(d.force);
        assert_eq!(d.source, DecisionSource::Override);
        assert_eq!(d.target, Axis::EastWest);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let high = Decision::new(Axis::NorthSouth, StrategyKind::Timer, 3.0);
        assert!((high.confidence - 1.0).abs() < f32::EPSILON);
        let nan = Decision::new(Axis::NorthSouth, StrategyKind::Timer, f32::NAN);
        assert!(nan.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn test_into_fallback_retags() {
        let d = Decision::new(Axis::EastWest, StrategyKind::Timer, 1.0).into_fallback();
        assert_eq!(d.source, DecisionSource::Fallback);
        assert_eq!(d.source.label(), "fallback");
    }

    #[test]
    fn test_max_green_override() {
        let now = Instant::now();
        let limit = Duration::from_secs(60);
        let quiet = [obs(0, 0); 4];

        let young = snapshot_with(now, quiet, Phase::NsGreen, Duration::from_secs(59), None);
        assert_eq!(max_green_override(&young.phase, limit), None);

        let old = snapshot_with(now, quiet, Phase::NsGreen, limit, None);
        assert_eq!(max_green_override(&old.phase, limit), Some(Axis::EastWest));

        let clearing = snapshot_with(now, quiet, Phase::AllRed, limit * 2, Some(Axis::NorthSouth));
        assert_eq!(max_green_override(&clearing.phase, limit), None);
    }
}
