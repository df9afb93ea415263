//! `trafficmind` - supervised decision core for a four-way signalized
//! intersection.
//!
//! A fixed-period decision loop picks which axis gets right-of-way using a
//! pluggable strategy (fixed timer, rule-based pressure heuristic, or a
//! learned policy), enforces legal phase sequencing, falls back to the
//! timer when a strategy misbehaves, preempts for emergency vehicles, and
//! mirrors the phase onto signal hardware over a single-byte serial
//! protocol.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod intersection;
pub mod observability;
pub mod phase;
pub mod strategy;
pub mod supervisor;
pub mod transport;

pub use bridge::{ActuationBridge, HardwareSync};
pub use controller::{ControlCommand, Controller, ControllerHandle, ControllerStatus};
pub use error::TrafficMindError;
pub use supervisor::SafetySupervisor;
