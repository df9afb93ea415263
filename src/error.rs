//! Error types for `trafficmind`
//!
//! The control path recovers from every error listed here locally; only
//! configuration and startup errors ever reach `main` and become exit codes.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::strategy::StrategyKind;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `trafficmind` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Transport error (serial link could not be opened)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Policy model could not be loaded
    pub const POLICY_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `trafficmind` operations.
///
/// Aggregates the domain errors that can escape to the CLI and maps
/// each of them to an exit code.
#[derive(Debug, Error)]
pub enum TrafficMindError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport layer error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Policy model error
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Controller command error
    #[error(transparent)]
    Control(#[from] ControlError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TrafficMindError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Policy(_) => ExitCode::POLICY_ERROR,
            Self::Control(_) => ExitCode::ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Configuration file exceeds the size limit
    #[error("configuration file {path} is {size} bytes (limit: {limit})")]
    FileTooLarge {
        /// Path to the configuration file
        path: PathBuf,
        /// Actual size in bytes
        size: u64,
        /// Configured limit in bytes
        limit: u64,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "timing.min_green")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Validation failure that prevents the configuration from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Serial link errors.
///
/// None of these are fatal once the controller is running: the actuation
/// bridge reports them as a degraded hardware-sync status and carries on.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during link operations
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to open or connect the link
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The link reached EOF
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Read or write did not finish in time
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// Control Path Errors
// ============================================================================

/// Fault raised by a decision strategy.
///
/// Always recovered by the safety supervisor, which demotes to the timer
/// strategy and logs the event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    /// The strategy did not return within the per-tick budget
    #[error("strategy exceeded its {budget:?} budget")]
    Timeout {
        /// Budget that was exceeded
        budget: Duration,
    },

    /// The policy model signalled a fault
    #[error("inference failed: {0}")]
    Inference(String),

    /// The blocking inference task panicked or was cancelled
    #[error("inference task aborted: {0}")]
    TaskAborted(String),
}

impl From<PolicyError> for StrategyError {
    fn from(err: PolicyError) -> Self {
        Self::Inference(err.to_string())
    }
}

/// A phase request the state machine refused.
///
/// The caller simply retries on a later tick.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TransitionRejected {
    /// The current green has not yet held for the minimum dwell
    #[error("green held for {held:?}, minimum dwell is {min:?}")]
    TooEarly {
        /// How long the current green has been shown
        held: Duration,
        /// Configured minimum dwell
        min: Duration,
    },
}

/// An unparsable sensor read-back line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SensorFrameError {
    /// The line does not follow `N:<0|1>,S:<0|1>,E:<0|1>,W:<0|1>`
    #[error("malformed sensor frame '{line}': {reason}")]
    Malformed {
        /// The offending line (trimmed)
        line: String,
        /// What was wrong with it
        reason: String,
    },
}

impl SensorFrameError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line: line.trim_end().to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors returned to callers of the controller handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The requested strategy is not configured (e.g. no policy model loaded)
    #[error("strategy '{0}' is not available")]
    StrategyUnavailable(StrategyKind),

    /// The controller loop has shut down
    #[error("controller is not running")]
    ControllerStopped,
}

/// Policy model loading and inference errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Model file could not be read
    #[error("failed to read model {path}: {source}")]
    Read {
        /// Path to the model file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Model file is not valid JSON for the expected format
    #[error("invalid model file {path}: {source}")]
    Format {
        /// Path to the model file
        path: PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// Layer dimensions do not chain or do not match the feature vector
    #[error("model shape mismatch: {0}")]
    Shape(String),

    /// Inference produced a non-finite value or otherwise failed
    #[error("{0}")]
    Fault(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let cases: Vec<(TrafficMindError, i32)> = vec![
            (
                ConfigError::MissingFile {
                    path: PathBuf::from("/x"),
                }
                .into(),
                ExitCode::CONFIG_ERROR,
            ),
            (
                TransportError::ConnectionFailed("x".into()).into(),
                ExitCode::TRANSPORT_ERROR,
            ),
            (
                PolicyError::Shape("x".into()).into(),
                ExitCode::POLICY_ERROR,
            ),
            (
                ControlError::ControllerStopped.into(),
                ExitCode::ERROR,
            ),
            (
                std::io::Error::new(std::io::ErrorKind::NotFound, "x").into(),
                ExitCode::IO_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.exit_code(), expected, "Wrong exit code for {err}");
        }
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "timing.yellow".to_string(),
            message: "must be positive".to_string(),
            severity: Severity::Error,
        };
        assert_eq!(issue.to_string(), "error: must be positive at timing.yellow");
    }

    #[test]
    fn test_policy_error_converts_to_inference_fault() {
        let err: StrategyError = PolicyError::Fault("NaN output".into()).into();
        assert_eq!(err, StrategyError::Inference("NaN output".into()));
    }

    #[test]
    fn test_sensor_frame_error_trims_newline() {
        let err = SensorFrameError::malformed("garbage\n", "missing key");
        assert_eq!(err.to_string(), "malformed sensor frame 'garbage': missing key");
    }
}
