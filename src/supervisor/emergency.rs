//! Emergency vehicle override with clear-side hysteresis.

use tracing::{info, warn};

use crate::config::schema::EmergencyConfig;
use crate::intersection::{ApproachObservation, Axis, Direction};

/// Result of one [`EmergencyOverride::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyStatus {
    /// No override in effect
    Inactive,
    /// The override activated on this tick
    Activated {
        /// Direction that triggered it
        direction: Direction,
    },
    /// The override was already active and still is
    Active {
        /// Direction currently served
        direction: Direction,
        /// Consecutive quiet ticks seen so far
        quiet_ticks: u32,
    },
    /// The override cleared on this tick
    Cleared {
        /// Direction it last served
        direction: Direction,
        /// Quiet ticks that cleared it
        quiet_ticks: u32,
    },
}

impl EmergencyStatus {
    /// Axis the override forces green, if it is in effect this tick.
    #[must_use]
    pub const fn axis(self) -> Option<Axis> {
        match self {
            Self::Activated { direction } | Self::Active { direction, .. } => {
                Some(direction.axis())
            }
            Self::Inactive | Self::Cleared { .. } => None,
        }
    }

    /// Direction served while in effect.
    #[must_use]
    pub const fn direction(self) -> Option<Direction> {
        match self {
            Self::Activated { direction } | Self::Active { direction, .. } => Some(direction),
            Self::Inactive | Self::Cleared { .. } => None,
        }
    }
}

/// Tracks emergency presence across ticks.
///
/// Activation is immediate. Clearing waits for `clear_after_ticks`
/// consecutive ticks without presence on any approach.
#[derive(Debug, Clone)]
pub struct EmergencyOverride {
    clear_after_ticks: u32,
    active: Option<Direction>,
    quiet_ticks: u32,
    activations: u64,
}

impl EmergencyOverride {
    /// Creates an inactive override. A zero threshold is treated as 1.
    #[must_use]
    pub fn new(config: &EmergencyConfig) -> Self {
        Self {
            clear_after_ticks: config.clear_after_ticks.max(1),
            active: None,
            quiet_ticks: 0,
            activations: 0,
        }
    }

    /// Direction currently served, if active.
    #[must_use]
    pub const fn active(&self) -> Option<Direction> {
        self.active
    }

    /// Number of activations since start.
    #[must_use]
    pub const fn activations(&self) -> u64 {
        self.activations
    }

    /// Feeds one tick of merged observations.
    pub fn update(&mut self, observations: &[ApproachObservation; 4]) -> EmergencyStatus {
        let reporting: Vec<Direction> = Direction::ALL
            .into_iter()
            .filter(|d| observations[d.index()].emergency_vehicle_present)
            .collect();

        let Some(current) = self.active else {
            let Some(&first) = reporting.first() else {
                return EmergencyStatus::Inactive;
            };
            self.active = Some(first);
            self.quiet_ticks = 0;
            self.activations += 1;
            warn!(direction = %first, axis = %first.axis(), "emergency override activated");
            return EmergencyStatus::Activated { direction: first };
        };

        if let Some(&first) = reporting.first() {
            self.quiet_ticks = 0;
            let direction = if reporting.contains(&current) {
                current
            } else {
                info!(
                    from = %current,
                    to = %first,
                    "emergency override follows reporting approach"
                );
                first
            };
            self.active = Some(direction);
            return EmergencyStatus::Active {
                direction,
                quiet_ticks: 0,
            };
        }

        self.quiet_ticks += 1;
        if self.quiet_ticks >= self.clear_after_ticks {
            let quiet_ticks = self.quiet_ticks;
            self.active = None;
            self.quiet_ticks = 0;
            info!(direction = %current, quiet_ticks, "emergency override cleared");
            return EmergencyStatus::Cleared {
                direction: current,
                quiet_ticks,
            };
        }

        EmergencyStatus::Active {
            direction: current,
            quiet_ticks: self.quiet_ticks,
        }
    }
}
