//! Configuration module
//!
//! Loads and validates the controller configuration: signal timing,
//! supervisor budget, emergency hysteresis, strategy tuning, and the
//! hardware link.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
