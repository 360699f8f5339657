//! Node pool auto-scaler
//!
//! Compares the aggregate CPU allocation of Healthy nodes against a
//! threshold once per tick. Above it, one standard-size node is added;
//! well below it, one idle auto-scaled node is removed. At most one action
//! is taken per tick, and nodes hosting pods are never scaled down.
//!
//! The decision is a pure function of the store; the controller carries it
//! out through the provisioner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::NodeId;
use super::store::ClusterState;

/// Auto-scaling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AutoscalerConfig {
    /// Whether auto-scaling starts enabled (toggleable at runtime)
    #[serde(default)]
    pub enabled: bool,

    /// Never scale down below this many nodes
    #[serde(default = "default_min_nodes")]
    pub min_nodes: usize,

    /// Never scale up beyond this many nodes
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    /// Allocation ratio above which a node is added (0.0 - 1.0)
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    /// Scale down when the ratio falls below `cpu_threshold * scale_down_factor`
    #[serde(default = "default_scale_down_factor")]
    pub scale_down_factor: f64,

    /// CPU capacity of auto-scaled nodes
    #[serde(default = "default_node_cpu")]
    pub node_cpu: f64,
}

fn default_min_nodes() -> usize {
    2
}

fn default_max_nodes() -> usize {
    5
}

fn default_cpu_threshold() -> f64 {
    0.8
}

fn default_scale_down_factor() -> f64 {
    0.6
}

fn default_node_cpu() -> f64 {
    4.0
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_nodes: default_min_nodes(),
            max_nodes: default_max_nodes(),
            cpu_threshold: default_cpu_threshold(),
            scale_down_factor: default_scale_down_factor(),
            node_cpu: default_node_cpu(),
        }
    }
}

impl AutoscalerConfig {
    /// Ratio below which scale-down is considered
    pub fn scale_down_threshold(&self) -> f64 {
        self.cpu_threshold * self.scale_down_factor
    }
}

/// Scaling decision from the auto-scaler
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingDecision {
    /// No change needed
    NoChange,
    /// Provision one node of `cpu` capacity
    ScaleUp { cpu: f64, reason: String },
    /// Decommission this idle auto-scaled node
    ScaleDown { node: NodeId, reason: String },
}

/// Evaluate the scaling decision for the current cluster state
pub fn evaluate_scaling(state: &ClusterState, config: &AutoscalerConfig) -> ScalingDecision {
    let stats = state.stats();
    let Some(ratio) = stats.usage_ratio() else {
        return ScalingDecision::NoChange;
    };
    let node_count = state.node_count();
    // Nodes still being provisioned already count against the upper bound
    let committed = node_count + state.pending_nodes();

    if ratio > config.cpu_threshold && committed < config.max_nodes {
        return ScalingDecision::ScaleUp {
            cpu: config.node_cpu,
            reason: format!(
                "High allocation: {:.2} of healthy CPU (threshold {:.2}), {} of max {} nodes",
                ratio, config.cpu_threshold, committed, config.max_nodes
            ),
        };
    }

    if ratio < config.scale_down_threshold() && node_count > config.min_nodes {
        let candidate = state.nodes().find(|n| n.auto_scaled && n.is_idle());
        if let Some(node) = candidate {
            return ScalingDecision::ScaleDown {
                node: node.id,
                reason: format!(
                    "Low allocation: {:.2} of healthy CPU (below {:.2}), {} of min {} nodes",
                    ratio,
                    config.scale_down_threshold(),
                    node_count,
                    config.min_nodes
                ),
            };
        }
    }

    ScalingDecision::NoChange
}

/// Kind of scaling action last carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
}

/// Record of the auto-scaler's most recent activity, for status reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<ScalingAction>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_node: Option<NodeId>,

    /// Ratio observed on the most recent evaluation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ratio: Option<f64>,
}

impl AutoscalerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, action: ScalingAction, node: NodeId) {
        self.last_action = Some(action);
        self.last_action_at = Some(Utc::now());
        self.last_node = Some(node);
    }
}
