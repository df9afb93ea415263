//! Configuration loader
//!
//! Loading pipeline:
//! 1. Size check against [`ConfigLimits`]
//! 2. Environment variable expansion on the raw text
//! 3. YAML parsing into [`ControllerConfig`]
//! 4. Validation
//! 5. Freeze with `Arc`

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::schema::ControllerConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Options for the configuration loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Limits for configuration size.
    pub config_limits: ConfigLimits,
}

/// Limits on the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum configuration file size in bytes.
    pub max_config_size: u64,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_config_size: env_or("TRAFFICMIND_MAX_CONFIG_SIZE", 1024 * 1024),
        }
    }
}

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated configuration.
    pub config: Arc<ControllerConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during configuration loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

/// Configuration loader.
///
/// Turns a YAML file (or string) into a frozen [`ControllerConfig`].
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a new loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing or too large, if an
    /// environment reference cannot be resolved, if the YAML does not match
    /// the schema, or if validation reports any error.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let limit = self.options.config_limits.max_config_size;
        if metadata.len() > limit {
            return Err(ConfigError::FileTooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                limit,
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        debug!(path = %path.display(), bytes = raw.len(), "loading configuration");
        self.load_source(&raw, path)
    }

    /// Loads and validates configuration text that did not come from a file.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus the file checks.
    pub fn load_str(&self, yaml: &str) -> Result<LoadResult, ConfigError> {
        let limit = self.options.config_limits.max_config_size;
        let size = u64::try_from(yaml.len()).unwrap_or(u64::MAX);
        if size > limit {
            return Err(ConfigError::FileTooLarge {
                path: "<inline>".into(),
                size,
                limit,
            });
        }
        self.load_source(yaml, Path::new("<inline>"))
    }

    #[allow(clippy::unused_self)]
    fn load_source(&self, raw: &str, path: &Path) -> Result<LoadResult, ConfigError> {
        // Handle UTF-8 BOM
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let expanded = expand_env(raw, path)?;

        // An empty document means "all defaults"
        let config: ControllerConfig = if expanded.trim().is_empty() {
            ControllerConfig::default()
        } else {
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?
        };

        let result = Validator::new().validate(&config);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: result.errors,
            });
        }

        let warnings = result
            .warnings
            .into_iter()
            .map(|issue| LoadWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expands environment references in raw YAML text.
///
/// Supports:
/// - `${VAR}` - value of `VAR`; an unset variable is an error
/// - `${VAR:-default}` - `default` if `VAR` is unset or empty
/// - `$$` - literal `$`
///
/// A `$` not followed by `{` or `$` is kept as is.
fn expand_env(raw: &str, path: &Path) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(body) = tail.strip_prefix('{') {
            let end = body.find('}').ok_or_else(|| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: Some(raw[..raw.len() - rest.len() + pos].lines().count().max(1)),
                message: "unclosed environment variable reference".to_string(),
            })?;
            out.push_str(&resolve_reference(&body[..end])?);
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = tail;
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve_reference(reference: &str) -> Result<String, ConfigError> {
    let (name, default) = match reference.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (reference, None),
    };

    match (std::env::var(name), default) {
        (Ok(value), Some(default)) if value.is_empty() => Ok(default.to_string()),
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::EnvVarNotSet {
            var: name.to_string(),
        }),
    }
}

/// Reads a value from an environment variable, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
