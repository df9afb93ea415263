//! Fixed-cycle timer strategy.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::schema::TimingConfig;
use crate::error::StrategyError;
use crate::intersection::Axis;

use super::{Decision, DecisionStrategy, StrategyKind, TickSnapshot};

/// Alternates the two axes on a fixed schedule, ignoring observations.
///
/// Each slot lasts `timer_green + yellow + all_red`, so every axis gets
/// about `timer_green` of real green once the clearance intervals are
/// taken out. The cycle position is computed from the snapshot time, so
/// the strategy holds no mutable state.
#[derive(Debug, Clone)]
pub struct TimerStrategy {
    epoch: Instant,
    slot: Duration,
}

impl TimerStrategy {
    /// Creates a timer whose first slot (North/South) starts at `epoch`.
    #[must_use]
    pub fn new(timing: &TimingConfig, epoch: Instant) -> Self {
        Self {
            epoch,
            slot: timing.timer_green + timing.yellow + timing.all_red,
        }
    }

    /// Length of one slot.
    #[must_use]
    pub const fn slot(&self) -> Duration {
        self.slot
    }

    /// Axis scheduled at `at`.
    #[must_use]
    pub fn axis_at(&self, at: Instant) -> Axis {
        let elapsed = at.saturating_duration_since(self.epoch).as_nanos();
        let slot_index = elapsed.checked_div(self.slot.as_nanos()).unwrap_or(0);
        if slot_index % 2 == 0 {
            Axis::NorthSouth
        } else {
            Axis::EastWest
        }
    }

    /// Infallible decision for this snapshot.
    ///
    /// This is what the supervisor falls back to.
    #[must_use]
    pub fn decide_now(&self, snapshot: &TickSnapshot) -> Decision {
        Decision::new(self.axis_at(snapshot.at), StrategyKind::Timer, 1.0)
    }
}

#[async_trait::async_trait]
impl DecisionStrategy for TimerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Timer
    }

    async fn decide(&self, snapshot: &TickSnapshot) -> Result<Decision, StrategyError> {
        Ok(self.decide_now(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::strategy::test_support::{obs, snapshot_with};

    fn timing() -> TimingConfig {
        TimingConfig {
            timer_green: Duration::from_secs(20),
            yellow: Duration::from_secs(3),
            all_red: Duration::from_secs(2),
            ..TimingConfig::default()
        }
    }

    #[test]
    fn test_slot_includes_clearance() {
        let timer = TimerStrategy::new(&timing(), Instant::now());
        assert_eq!(timer.slot(), Duration::from_secs(25));
    }

    #[test]
    fn test_alternates_by_slot() {
        let epoch = Instant::now();
        let timer = TimerStrategy::new(&timing(), epoch);
        assert_eq!(timer.axis_at(epoch), Axis::NorthSouth);
        assert_eq!(timer.axis_at(epoch + Duration::from_secs(24)), Axis::NorthSouth);
        assert_eq!(timer.axis_at(epoch + Duration::from_secs(25)), Axis::EastWest);
        assert_eq!(timer.axis_at(epoch + Duration::from_secs(49)), Axis::EastWest);
        assert_eq!(timer.axis_at(epoch + Duration::from_secs(50)), Axis::NorthSouth);
    }

    #[test]
    fn test_before_epoch_is_first_slot() {
        let epoch = Instant::now() + Duration::from_secs(10);
        let timer = TimerStrategy::new(&timing(), epoch);
        assert_eq!(timer.axis_at(Instant::now()), Axis::NorthSouth);
    }

    #[tokio::test]
    async fn test_ignores_observations() {
        let epoch = Instant::now();
        let timer = TimerStrategy::new(&timing(), epoch);
        let at = epoch + Duration::from_secs(30);

        let busy_ns = [obs(50, 300), obs(50, 300), obs(0, 0), obs(0, 0)];
        let snap = snapshot_with(at, busy_ns, Phase::NsGreen, Duration::from_secs(5), None);
        let decision = timer.decide(&snap).await.unwrap();
        assert_eq!(decision.target, Axis::EastWest);
        assert_eq!(decision, timer.decide_now(&snap));
    }
}
