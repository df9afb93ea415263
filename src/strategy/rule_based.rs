//! Rule-based pressure strategy.
//!
//! Pressure per direction is `queue_length + wait_weight * wait_secs`; an
//! axis's pressure is the sum over its two directions. The opposite axis is
//! requested only when its pressure exceeds `current * switch_ratio`.

use std::time::Duration;

use crate::config::schema::{RuleBasedConfig, TimingConfig};
use crate::error::StrategyError;
use crate::intersection::{ApproachObservation, Axis, Direction};

use super::{Decision, DecisionStrategy, StrategyKind, TickSnapshot, max_green_override};

/// Queue/wait pressure heuristic.
#[derive(Debug, Clone)]
pub struct RuleBasedStrategy {
    wait_weight: f64,
    switch_ratio: f64,
    max_green: Duration,
}

impl RuleBasedStrategy {
    /// Creates the strategy from its tuning and the max-green guard.
    #[must_use]
    pub const fn new(config: &RuleBasedConfig, timing: &TimingConfig) -> Self {
        Self {
            wait_weight: config.wait_weight,
            switch_ratio: config.switch_ratio,
            max_green: timing.max_green,
        }
    }

    /// Pressure of one approach.
    #[must_use]
    pub fn pressure(&self, obs: &ApproachObservation) -> f64 {
        f64::from(obs.queue_length) + self.wait_weight * obs.wait_time.as_secs_f64()
    }

    /// Summed pressure of an axis.
    #[must_use]
    pub fn axis_pressure(&self, observations: &[ApproachObservation; 4], axis: Axis) -> f64 {
        axis.directions()
            .iter()
            .map(|d: &Direction| self.pressure(&observations[d.index()]))
            .sum()
    }

    /// Pure, synchronous decision.
    #[must_use]
    pub fn evaluate(&self, snapshot: &TickSnapshot) -> Decision {
        let ns = self.axis_pressure(&snapshot.observations, Axis::NorthSouth);
        let ew = self.axis_pressure(&snapshot.observations, Axis::EastWest);
        let pressure_of = |axis: Axis| match axis {
            Axis::NorthSouth => ns,
            Axis::EastWest => ew,
        };

        // Ties go to the axis shown or being cleared to, then to North/South
        let target = match snapshot.phase.committed_axis() {
            Some(incumbent) => {
                let challenger = incumbent.other();
                if pressure_of(challenger) > pressure_of(incumbent) * self.switch_ratio {
                    challenger
                } else {
                    incumbent
                }
            }
            None if ew > ns => Axis::EastWest,
            None => Axis::NorthSouth,
        };

        if let Some(starved) = max_green_override(&snapshot.phase, self.max_green) {
            return Decision::new(starved, StrategyKind::RuleBased, 1.0);
        }

        let total = ns + ew;
        #[allow(clippy::cast_possible_truncation)]
        let confidence = if total > 0.0 {
            ((ns - ew).abs() / total) as f32
        } else {
            0.0
        };

        Decision::new(target, StrategyKind::RuleBased, confidence)
    }
}

#[async_trait::async_trait]
impl DecisionStrategy for RuleBasedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RuleBased
    }

    async fn decide(&self, snapshot: &TickSnapshot) -> Result<Decision, StrategyError> {
        Ok(self.evaluate(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::phase::Phase;
    use crate::strategy::test_support::{obs, snapshot_with};

    fn strategy(switch_ratio: f64) -> RuleBasedStrategy {
        RuleBasedStrategy::new(
            &RuleBasedConfig {
                wait_weight: 0.5,
                switch_ratio,
            },
            &TimingConfig::default(),
        )
    }

    fn green(current: Phase, observations: [ApproachObservation; 4]) -> TickSnapshot {
        snapshot_with(
            Instant::now(),
            observations,
            current,
            Duration::from_secs(10),
            None,
        )
    }

    #[test]
    fn test_pressure_formula() {
        let s = strategy(1.0);
        assert!((s.pressure(&obs(4, 10)) - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_heavy_north_south_wins_from_any_phase() {
        let s = strategy(1.0);
        let demand = [obs(10, 0), obs(8, 0), obs(1, 0), obs(1, 0)];
        for phase in [Phase::NsGreen, Phase::EwGreen, Phase::AllRed] {
            let decision = s.evaluate(&green(phase, demand));
            assert_eq!(decision.target, Axis::NorthSouth, "from {phase}");
        }
    }

    #[test]
    fn test_tie_keeps_current_green() {
        let s = strategy(1.0);
        let even = [obs(3, 0), obs(3, 0), obs(3, 0), obs(3, 0)];
        assert_eq!(s.evaluate(&green(Phase::EwGreen, even)).target, Axis::EastWest);
        assert_eq!(s.evaluate(&green(Phase::NsGreen, even)).target, Axis::NorthSouth);
        assert!(s.evaluate(&green(Phase::NsGreen, even)).confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn test_tie_during_clearance_favours_pending() {
        let s = strategy(1.0);
        let even = [obs(2, 0); 4];
        let snap = snapshot_with(
            Instant::now(),
            even,
            Phase::AllYellow,
            Duration::from_secs(1),
            Some(Axis::EastWest),
        );
        assert_eq!(s.evaluate(&snap).target, Axis::EastWest);
    }

    #[test]
    fn test_idle_tie_favours_north_south() {
        let s = strategy(1.0);
        let snap = snapshot_with(
            Instant::now(),
            [obs(0, 0); 4],
            Phase::AllRed,
            Duration::ZERO,
            None,
        );
        assert_eq!(s.evaluate(&snap).target, Axis::NorthSouth);
    }

    #[test]
    fn test_switch_ratio_adds_hysteresis() {
        let s = strategy(1.5);
        // EW pressure 12 vs NS 10: above 1.0x, below 1.5x
        let demand = [obs(5, 0), obs(5, 0), obs(6, 0), obs(6, 0)];
        assert_eq!(s.evaluate(&green(Phase::NsGreen, demand)).target, Axis::NorthSouth);
        assert_eq!(strategy(1.0).evaluate(&green(Phase::NsGreen, demand)).target, Axis::EastWest);
    }

    #[test]
    fn test_wait_time_counts() {
        let s = strategy(1.0);
        // EW has fewer cars but they have waited a long time
        let demand = [obs(4, 0), obs(4, 0), obs(1, 20), obs(1, 0)];
        assert_eq!(s.evaluate(&green(Phase::NsGreen, demand)).target, Axis::EastWest);
    }

    #[test]
    fn test_max_green_forces_switch() {
        let s = strategy(1.0);
        let demand = [obs(20, 0), obs(20, 0), obs(0, 0), obs(0, 0)];
        let snap = snapshot_with(
            Instant::now(),
            demand,
            Phase::NsGreen,
            TimingConfig::default().max_green,
            None,
        );
        assert_eq!(s.evaluate(&snap).target, Axis::EastWest);
    }

    #[test]
    fn test_confidence_is_normalised_difference() {
        let s = strategy(1.0);
        let demand = [obs(3, 0), obs(3, 0), obs(1, 0), obs(1, 0)];
        let decision = s.evaluate(&green(Phase::NsGreen, demand));
        assert!((decision.confidence - 0.5).abs() < 1e-6);
    }
}
