//! Configuration management
//!
//! Handles statewall.toml: admission policy, flow table limits and logging.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Load and validate configuration, failing on validation errors
pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<(Config, ValidationResult)> {
    let config = load(path)?;
    let validation = validate(&config);
    if validation.has_errors() {
        return Err(Error::Config(validation.errors.join("; ")));
    }
    Ok((config, validation))
}
