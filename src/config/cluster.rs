use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{
    AutoscalerConfig, ControllerConfig, SchedulingStrategy, HEARTBEAT_INTERVAL_SECS,
    NODE_TIMEOUT_SECS,
};
use crate::runtime::DockerConfig;

/// Errors that can occur during config parsing and validation
#[derive(Error, Debug, PartialEq)]
pub enum ClusterConfigError {
    #[error("Config parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Which provisioner backs new nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionerKind {
    /// One container per node via the docker CLI
    #[default]
    Docker,
    /// In-process, no external side effects
    Simulated,
}

/// The complete cluster config file structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// Seconds between reconciliation ticks
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Seconds without a heartbeat before a node is Unresponsive
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,

    #[serde(default)]
    pub scheduling_strategy: SchedulingStrategy,

    #[serde(default)]
    pub autoscaling: AutoscalerConfig,

    #[serde(default)]
    pub provisioner: ProvisionerKind,

    #[serde(default)]
    pub docker: DockerConfig,
}

fn default_reconcile_interval() -> u64 {
    HEARTBEAT_INTERVAL_SECS
}

fn default_node_timeout() -> u64 {
    NODE_TIMEOUT_SECS
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            node_timeout_secs: default_node_timeout(),
            scheduling_strategy: SchedulingStrategy::default(),
            autoscaling: AutoscalerConfig::default(),
            provisioner: ProvisionerKind::default(),
            docker: DockerConfig::default(),
        }
    }
}

// ============================================================================
// SBIO: Pure parsing and validation (no I/O)
// ============================================================================

/// Parse a YAML or JSON config string without validating it
pub fn parse_config(content: &str) -> Result<ClusterConfig, ClusterConfigError> {
    if content.trim().is_empty() {
        return Ok(ClusterConfig::default());
    }
    serde_yaml::from_str(content).map_err(|e| ClusterConfigError::ParseError(e.to_string()))
}

fn invalid(field: &'static str, message: impl Into<String>) -> ClusterConfigError {
    ClusterConfigError::InvalidValue {
        field,
        message: message.into(),
    }
}

/// Upper bound for the interval and timeout settings (one day)
pub const MAX_DURATION_SECS: u64 = 86_400;

fn validate_secs(field: &'static str, secs: u64) -> Result<(), ClusterConfigError> {
    if secs == 0 {
        return Err(invalid(field, "must be at least 1"));
    }
    if secs > MAX_DURATION_SECS {
        return Err(invalid(
            field,
            format!("{} exceeds the maximum of {}", secs, MAX_DURATION_SECS),
        ));
    }
    Ok(())
}

/// Validate a parsed config
pub fn validate_config(config: &ClusterConfig) -> Result<(), ClusterConfigError> {
    validate_secs("reconcile-interval-secs", config.reconcile_interval_secs)?;
    validate_secs("node-timeout-secs", config.node_timeout_secs)?;

    let scaling = &config.autoscaling;
    if scaling.min_nodes > scaling.max_nodes {
        return Err(invalid(
            "autoscaling.min-nodes",
            format!(
                "{} exceeds max-nodes {}",
                scaling.min_nodes, scaling.max_nodes
            ),
        ));
    }
    if !(scaling.cpu_threshold > 0.0 && scaling.cpu_threshold <= 1.0) {
        return Err(invalid(
            "autoscaling.cpu-threshold",
            format!("{} is outside (0, 1]", scaling.cpu_threshold),
        ));
    }
    if !(scaling.scale_down_factor > 0.0 && scaling.scale_down_factor < 1.0) {
        return Err(invalid(
            "autoscaling.scale-down-factor",
            format!("{} is outside (0, 1)", scaling.scale_down_factor),
        ));
    }
    if !(scaling.node_cpu.is_finite() && scaling.node_cpu > 0.0) {
        return Err(invalid(
            "autoscaling.node-cpu",
            format!("{} is not a positive number", scaling.node_cpu),
        ));
    }

    if config.provisioner == ProvisionerKind::Docker {
        if config.docker.image.trim().is_empty() {
            return Err(invalid("docker.image", "must not be empty"));
        }
        if config.docker.command.is_empty() {
            return Err(invalid("docker.command", "must not be empty"));
        }
    }

    Ok(())
}

impl ClusterConfig {
    /// Parse and validate a config string
    pub fn from_str(content: &str) -> Result<Self, ClusterConfigError> {
        let config = parse_config(content)?;
        validate_config(&config)?;
        Ok(config)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            node_timeout_secs: self.node_timeout_secs,
            scheduling_strategy: self.scheduling_strategy,
            autoscaler: self.autoscaling.clone(),
        }
    }
}
