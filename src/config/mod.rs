pub mod cluster;

pub use cluster::{
    parse_config, validate_config, ClusterConfig, ClusterConfigError, ProvisionerKind,
};

use std::path::Path;
use thiserror::Error;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config error: {0}")]
    ClusterConfigError(#[from] ClusterConfigError),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load, parse and validate a config file from disk.
pub fn load_config_file(path: &Path) -> Result<ClusterConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = ClusterConfig::from_str(&content)?;
    Ok(config)
}

/// Load the config file if one is given, otherwise the defaults.
pub fn load_config(path: Option<&Path>) -> Result<ClusterConfig, ConfigError> {
    match path {
        Some(path) => load_config_file(path),
        None => Ok(ClusterConfig::default()),
    }
}
