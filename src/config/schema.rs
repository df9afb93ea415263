//! Configuration schema types
//!
//! Deserialized from YAML. Every section has defaults, so an empty file is
//! a valid configuration. Durations use humantime syntax (`"250ms"`,
//! `"3s"`, `"1m 30s"`).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategy::StrategyKind;

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root configuration for the controller.
///
/// Built once at startup, then shared immutably with every component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Signal timing
    pub timing: TimingConfig,

    /// Safety supervisor settings
    pub supervisor: SupervisorConfig,

    /// Emergency override hysteresis
    pub emergency: EmergencyConfig,

    /// Rule-based strategy tuning
    pub rule_based: RuleBasedConfig,

    /// Learned-policy strategy settings
    pub learned: LearnedPolicyConfig,

    /// Signal hardware link
    pub hardware: HardwareConfig,

    /// Observation feed framing
    pub feed: FeedConfig,
}

// ============================================================================
// Timing
// ============================================================================

/// Signal timing constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Decision loop period
    #[serde(with = "humantime_duration")]
    pub tick: Duration,

    /// Minimum time a green holds before an unforced switch
    #[serde(with = "humantime_duration")]
    pub min_green: Duration,

    /// Green age at which adaptive strategies switch regardless of demand
    #[serde(with = "humantime_duration")]
    pub max_green: Duration,

    /// Yellow clearance interval
    #[serde(with = "humantime_duration")]
    pub yellow: Duration,

    /// All-red clearance interval
    #[serde(with = "humantime_duration")]
    pub all_red: Duration,

    /// Green slot of the fixed-timer strategy
    #[serde(with = "humantime_duration")]
    pub timer_green: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            min_green: Duration::from_secs(5),
            max_green: Duration::from_secs(60),
            yellow: Duration::from_secs(3),
            all_red: Duration::from_secs(2),
            timer_green: Duration::from_secs(20),
        }
    }
}

// ============================================================================
// Supervisor / Emergency
// ============================================================================

/// Safety supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Per-tick time budget for a strategy call
    #[serde(with = "humantime_duration")]
    pub budget: Duration,

    /// Strategy selected at startup
    pub initial_strategy: StrategyKind,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(50),
            initial_strategy: StrategyKind::Timer,
        }
    }
}

/// Emergency override settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmergencyConfig {
    /// Consecutive quiet ticks before an active override clears
    pub clear_after_ticks: u32,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            clear_after_ticks: 3,
        }
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Rule-based strategy tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleBasedConfig {
    /// Pressure added per second of cumulative wait
    pub wait_weight: f64,

    /// Opposing pressure must exceed `current * switch_ratio` to switch
    pub switch_ratio: f64,
}

impl Default for RuleBasedConfig {
    fn default() -> Self {
        Self {
            wait_weight: 0.5,
            switch_ratio: 1.0,
        }
    }
}

/// Learned-policy settings.
///
/// The `*_scale` values normalize raw observations into the model's
/// feature range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LearnedPolicyConfig {
    /// Path to the JSON weights file; the strategy is unavailable without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,

    /// Queue length that maps to 1.0
    pub queue_scale: f32,

    /// Cumulative wait that maps to 1.0
    #[serde(with = "humantime_duration")]
    pub wait_scale: Duration,

    /// Vehicles-passed count that maps to 1.0
    pub passed_scale: f32,
}

impl Default for LearnedPolicyConfig {
    fn default() -> Self {
        Self {
            model: None,
            queue_scale: 20.0,
            wait_scale: Duration::from_secs(180),
            passed_scale: 100.0,
        }
    }
}

// ============================================================================
// Hardware
// ============================================================================

/// Signal hardware link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HardwareConfig {
    /// Whether to drive hardware at all
    pub enabled: bool,

    /// Link address: a device path, `serial:<path>`, `tcp://host:port`, or `emulate`
    pub port: String,

    /// Line speed of the serial device
    pub baud_rate: u32,

    /// Bridge cadence
    #[serde(with = "humantime_duration")]
    pub actuation_interval: Duration,

    /// How often to request a sensor read-back (`None` disables polling)
    #[serde(with = "humantime_duration_opt", skip_serializing_if = "Option::is_none")]
    pub sensor_poll_interval: Option<Duration>,

    /// Idempotent re-send of the current command (`None` disables re-send)
    #[serde(with = "humantime_duration_opt", skip_serializing_if = "Option::is_none")]
    pub resend_interval: Option<Duration>,

    /// Upper bound on a single command write
    #[serde(with = "humantime_duration")]
    pub write_timeout: Duration,

    /// Upper bound on waiting for a sensor line
    #[serde(with = "humantime_duration")]
    pub read_timeout: Duration,

    /// Analog reading above which the emulated IR sensor reports presence
    pub presence_threshold: u16,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            actuation_interval: Duration::from_millis(50),
            sensor_poll_interval: Some(Duration::from_millis(500)),
            resend_interval: Some(Duration::from_secs(1)),
            write_timeout: Duration::from_millis(100),
            read_timeout: Duration::from_millis(200),
            presence_threshold: 500,
        }
    }
}

/// Baud rate of the signal controller firmware.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

// ============================================================================
// Feed
// ============================================================================

/// Observation feed framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    /// Longest accepted NDJSON line in bytes
    pub max_line_length: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_line_length: 64 * 1024,
        }
    }
}

// ============================================================================
// Duration (de)serialization
// ============================================================================

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

mod humantime_duration_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // signature dictated by serde(with)
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.collect_str(&humantime::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("off" | "never") => Ok(None),
            Some(s) => humantime::parse_duration(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: ControllerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.hardware.baud_rate, 9600);
        assert_eq!(config.supervisor.initial_strategy, StrategyKind::Timer);
    }

    #[test]
    fn test_humantime_durations_parse() {
        let yaml = r"
timing:
  tick: 250ms
  min_green: 7s
  yellow: 1m 30s
";
        let config: ControllerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.timing.tick, Duration::from_millis(250));
        assert_eq!(config.timing.min_green, Duration::from_secs(7));
        assert_eq!(config.timing.yellow, Duration::from_secs(90));
        // Unspecified fields keep their defaults
        assert_eq!(config.timing.all_red, Duration::from_secs(2));
    }

    #[test]
    fn test_optional_durations_can_be_disabled() {
        let yaml = r"
hardware:
  resend_interval: off
  sensor_poll_interval: ~
";
        let config: ControllerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.hardware.resend_interval, None);
        assert_eq!(config.hardware.sensor_poll_interval, None);
    }

    #[test]
    fn test_strategy_kind_parses_kebab_case() {
        let yaml = "supervisor:\n  initial_strategy: rule-based\n";
        let config: ControllerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.supervisor.initial_strategy, StrategyKind::RuleBased);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<ControllerConfig, _> = serde_yaml::from_str("timing:\n  tik: 1s\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let result: Result<ControllerConfig, _> =
            serde_yaml::from_str("timing:\n  yellow: soon\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trip_through_yaml() {
        let original = ControllerConfig::default();
        let yaml = serde_yaml::to_string(&original).unwrap();
        let parsed: ControllerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, original);
    }
}
