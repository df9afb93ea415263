//! Configuration validation
//!
//! Semantic checks on a fully deserialized [`ControllerConfig`]. All issues
//! are collected rather than stopping at the first one.

use std::time::Duration;

use crate::config::schema::{ControllerConfig, DEFAULT_BAUD_RATE};
use crate::error::{Severity, ValidationIssue};
use crate::strategy::StrategyKind;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &ControllerConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_timing(config);
        self.validate_supervisor(config);
        self.validate_strategies(config);
        self.validate_hardware(config);

        if config.feed.max_line_length == 0 {
            self.add_error("feed.max_line_length", "must be at least 1 byte");
        }

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_timing(&mut self, config: &ControllerConfig) {
        let timing = &config.timing;

        for (path, value) in [
            ("timing.tick", timing.tick),
            ("timing.min_green", timing.min_green),
            ("timing.max_green", timing.max_green),
            ("timing.yellow", timing.yellow),
            ("timing.all_red", timing.all_red),
            ("timing.timer_green", timing.timer_green),
        ] {
            self.require_positive(path, value);
        }

        if timing.min_green >= timing.max_green {
            self.add_error(
                "timing.max_green",
                &format!(
                    "max_green ({}) must be longer than min_green ({})",
                    humantime::format_duration(timing.max_green),
                    humantime::format_duration(timing.min_green),
                ),
            );
        }

        if timing.timer_green > timing.max_green {
            self.add_error(
                "timing.timer_green",
                "timer green slot must not exceed max_green",
            );
        }

        if timing.timer_green < timing.min_green {
            self.add_warning(
                "timing.timer_green",
                "timer green slot is shorter than min_green; the timer cannot switch on schedule",
            );
        }
    }

    fn validate_supervisor(&mut self, config: &ControllerConfig) {
        self.require_positive("supervisor.budget", config.supervisor.budget);

        if config.supervisor.budget >= config.timing.tick {
            self.add_warning(
                "supervisor.budget",
                "strategy budget is not shorter than the tick; ticks will overrun on timeouts",
            );
        }

        if config.emergency.clear_after_ticks == 0 {
            self.add_error("emergency.clear_after_ticks", "must be at least 1");
        }

        if config.supervisor.initial_strategy == StrategyKind::LearnedPolicy
            && config.learned.model.is_none()
        {
            self.add_error(
                "supervisor.initial_strategy",
                "learned-policy requires learned.model to be set",
            );
        }
    }

    fn validate_strategies(&mut self, config: &ControllerConfig) {
        let rule = &config.rule_based;
        if !rule.wait_weight.is_finite() || rule.wait_weight < 0.0 {
            self.add_error("rule_based.wait_weight", "must be a non-negative number");
        }
        if !rule.switch_ratio.is_finite() || rule.switch_ratio < 1.0 {
            self.add_error("rule_based.switch_ratio", "must be at least 1.0");
        }

        let learned = &config.learned;
        if !(learned.queue_scale.is_finite() && learned.queue_scale > 0.0) {
            self.add_error("learned.queue_scale", "must be a positive number");
        }
        if !(learned.passed_scale.is_finite() && learned.passed_scale > 0.0) {
            self.add_error("learned.passed_scale", "must be a positive number");
        }
        self.require_positive("learned.wait_scale", learned.wait_scale);
    }

    fn validate_hardware(&mut self, config: &ControllerConfig) {
        let hw = &config.hardware;

        if hw.baud_rate != DEFAULT_BAUD_RATE {
            self.add_warning(
                "hardware.baud_rate",
                &format!("signal firmware runs at {DEFAULT_BAUD_RATE} baud"),
            );
        }

        if hw.enabled && hw.port.trim().is_empty() {
            self.add_error("hardware.port", "a port is required when hardware is enabled");
        }

        self.require_positive("hardware.actuation_interval", hw.actuation_interval);
        self.require_positive("hardware.write_timeout", hw.write_timeout);
        self.require_positive("hardware.read_timeout", hw.read_timeout);

        if hw.sensor_poll_interval == Some(Duration::ZERO) {
            self.add_error(
                "hardware.sensor_poll_interval",
                "must be positive (use \"off\" to disable)",
            );
        }
        if hw.resend_interval == Some(Duration::ZERO) {
            self.add_error(
                "hardware.resend_interval",
                "must be positive (use \"off\" to disable)",
            );
        }

        if !hw.enabled {
            return;
        }
        // Longest the bridge can be busy before it sees the next phase
        let stall = match hw.sensor_poll_interval {
            Some(_) => hw.write_timeout + hw.read_timeout,
            None => hw.write_timeout,
        };
        for (path, value) in [
            ("timing.yellow", config.timing.yellow),
            ("timing.all_red", config.timing.all_red),
        ] {
            if !value.is_zero() && value <= stall {
                self.add_error(
                    path,
                    &format!(
                        "clearance must outlast the signal link stall of {}",
                        humantime::format_duration(stall),
                    ),
                );
            }
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    fn require_positive(&mut self, path: &str, value: Duration) {
        if value.is_zero() {
            self.add_error(path, "duration must be positive");
        }
    }

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
