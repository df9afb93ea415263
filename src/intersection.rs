//! Intersection state: per-approach observations.
//!
//! Pure data. The upstream simulation or sensor layer overwrites the
//! observations every tick; the decision core only reads snapshots.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transport::wire::SensorFrame;

/// One of the four approaches of the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Northern approach
    North,
    /// Southern approach
    South,
    /// Eastern approach
    East,
    /// Western approach
    West,
}

impl Direction {
    /// All directions in their fixed order.
    pub const ALL: [Self; 4] = [Self::North, Self::South, Self::East, Self::West];

    /// Position of this direction in [`Direction::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::North => 0,
            Self::South => 1,
            Self::East => 2,
            Self::West => 3,
        }
    }

    /// The axis this approach travels along.
    #[must_use]
    pub const fn axis(self) -> Axis {
        match self {
            Self::North | Self::South => Axis::NorthSouth,
            Self::East | Self::West => Axis::EastWest,
        }
    }

    /// Single-letter key used on the wire (`N`, `S`, `E`, `W`).
    #[must_use]
    pub const fn key(self) -> char {
        match self {
            Self::North => 'N',
            Self::South => 'S',
            Self::East => 'E',
            Self::West => 'W',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::North => "north",
            Self::South => "south",
            Self::East => "east",
            Self::West => "west",
        };
        f.write_str(name)
    }
}

/// A green-phase axis. Strategies can only ever ask for one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// North and South approaches
    NorthSouth,
    /// East and West approaches
    EastWest,
}

impl Axis {
    /// The opposing axis.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::NorthSouth => Self::EastWest,
            Self::EastWest => Self::NorthSouth,
        }
    }

    /// The two directions on this axis.
    #[must_use]
    pub const fn directions(self) -> [Direction; 2] {
        match self {
            Self::NorthSouth => [Direction::North, Direction::South],
            Self::EastWest => [Direction::East, Direction::West],
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NorthSouth => f.write_str("north_south"),
            Self::EastWest => f.write_str("east_west"),
        }
    }
}

/// Observation of a single approach for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ApproachObservation {
    /// Vehicles queued at the stop line
    pub queue_length: u32,
    /// Cumulative wait of the queued vehicles
    pub wait_time: Duration,
    /// Vehicles that have cleared the intersection (monotonic)
    pub vehicles_passed: u64,
    /// An emergency vehicle is approaching on this leg
    pub emergency_vehicle_present: bool,
}

/// Authoritative store of the latest observations.
///
/// Upstream observations and hardware sensor flags arrive separately; a
/// [`snapshot`](Self::snapshot) merges them so that a sensor presence flag
/// counts as emergency presence for its direction.
#[derive(Debug, Clone, Default)]
pub struct IntersectionState {
    approaches: [ApproachObservation; 4],
    sensor_presence: [bool; 4],
}

impl IntersectionState {
    /// Creates an empty intersection (no queues, no emergencies).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the observation for one direction.
    ///
    /// `vehicles_passed` never goes backwards; a smaller value from the
    /// source is clamped to the previous count.
    pub fn update(&mut self, direction: Direction, mut observation: ApproachObservation) {
        let slot = &mut self.approaches[direction.index()];
        if observation.vehicles_passed < slot.vehicles_passed {
            debug!(
                %direction,
                previous = slot.vehicles_passed,
                reported = observation.vehicles_passed,
                "vehicles_passed went backwards; keeping previous count"
            );
            observation.vehicles_passed = slot.vehicles_passed;
        }
        *slot = observation;
    }

    /// Overwrites all four observations, in [`Direction::ALL`] order.
    pub fn update_all(&mut self, observations: [ApproachObservation; 4]) {
        for (direction, observation) in Direction::ALL.into_iter().zip(observations) {
            self.update(direction, observation);
        }
    }

    /// Records the presence flags of a successfully parsed sensor frame.
    pub fn apply_sensor_frame(&mut self, frame: &SensorFrame) {
        for direction in Direction::ALL {
            self.sensor_presence[direction.index()] = frame.is_present(direction);
        }
    }

    /// Returns the merged observation for one direction.
    #[must_use]
    pub fn observation(&self, direction: Direction) -> ApproachObservation {
        let idx = direction.index();
        let mut obs = self.approaches[idx];
        obs.emergency_vehicle_present |= self.sensor_presence[idx];
        obs
    }

    /// Returns merged observations for all directions, in [`Direction::ALL`] order.
    #[must_use]
    pub fn snapshot(&self) -> [ApproachObservation; 4] {
        Direction::ALL.map(|d| self.observation(d))
    }
}
