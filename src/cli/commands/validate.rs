//! `validate` command: load and check a configuration without running.

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::loader::{ConfigLoader, LoadWarning};
use crate::error::{ConfigError, Severity, TrafficMindError, ValidationIssue};

/// Validates one configuration file and reports the outcome on stdout.
///
/// # Errors
///
/// Returns the [`ConfigError`] that made the file unusable. With
/// `--strict`, warnings are reported as a validation error.
pub fn run(args: &ValidateArgs) -> Result<(), TrafficMindError> {
    let path = &args.config;
    tracing::info!(file = %path.display(), "validating configuration");

    let result = ConfigLoader::default().load(path).and_then(|loaded| {
        if args.strict && !loaded.warnings.is_empty() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: loaded.warnings.iter().map(warning_as_error).collect(),
            });
        }
        Ok(loaded.warnings)
    });

    let file = path.display().to_string();
    match (&result, args.format) {
        (Ok(warnings), OutputFormat::Human) => {
            println!("{file}: valid");
            for warning in warnings {
                println!(
                    "  warning: {} at {}",
                    warning.message,
                    warning.location.as_deref().unwrap_or("<unknown>")
                );
            }
        }
        (Ok(warnings), OutputFormat::Json) => {
            let warnings: Vec<_> = warnings
                .iter()
                .map(|w| json!({ "path": w.location, "message": w.message }))
                .collect();
            println!(
                "{}",
                json!({ "file": file, "valid": true, "errors": [], "warnings": warnings })
            );
        }
        (Err(error), OutputFormat::Human) => {
            println!("{file}: invalid");
            for issue in issues(error) {
                println!("  {issue}");
            }
        }
        (Err(error), OutputFormat::Json) => {
            let errors: Vec<_> = issues(error)
                .iter()
                .map(|i| json!({ "path": i.path, "message": i.message }))
                .collect();
            println!(
                "{}",
                json!({ "file": file, "valid": false, "errors": errors, "warnings": [] })
            );
        }
    }

    result.map(|_| ()).map_err(Into::into)
}

fn warning_as_error(warning: &LoadWarning) -> ValidationIssue {
    ValidationIssue {
        path: warning.location.clone().unwrap_or_default(),
        message: warning.message.clone(),
        severity: Severity::Error,
    }
}

/// Flattens any config error into a list of issues for reporting.
fn issues(error: &ConfigError) -> Vec<ValidationIssue> {
    match error {
        ConfigError::ValidationError { errors, .. } => errors.clone(),
        ConfigError::ParseError { line, message, .. } => vec![ValidationIssue {
            path: line.map_or_else(|| "<document>".to_string(), |l| format!("line {l}")),
            message: message.clone(),
            severity: Severity::Error,
        }],
        other => vec![ValidationIssue {
            path: "<file>".to_string(),
            message: other.to_string(),
            severity: Severity::Error,
        }],
    }
}
