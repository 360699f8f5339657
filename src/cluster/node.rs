//! Node resource - a registered unit of CPU capacity
//!
//! A Node is backed by one provisioned compute unit and hosts zero or more
//! pods. Its allocation is the sum of the CPU requests of the pods it hosts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pod::PodId;
use super::resources::define_id;
use crate::runtime::BackingHandle;

define_id!(NodeId, "node");

/// Slack allowed when comparing summed CPU amounts.
///
/// Allocation is a running float sum, so a node filled exactly by
/// fractional requests can be a few ulps away from its capacity.
pub const CPU_TOLERANCE: f64 = 1e-9;

/// Liveness state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeStatus {
    /// Heartbeats are arriving; the node accepts pods
    #[default]
    Healthy,
    /// Heartbeat timed out (or failure was simulated)
    Unresponsive,
}

/// A Node in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,

    /// Total CPU capacity
    pub capacity: f64,

    /// CPU currently reserved by hosted pods
    pub allocated: f64,

    pub status: NodeStatus,

    /// Hosted pods in placement order
    pub pods: Vec<PodId>,

    /// Created by the autoscaler (eligible for automatic scale-down)
    #[serde(rename = "autoScaled")]
    pub auto_scaled: bool,

    /// Handle to the backing compute unit
    pub backing: BackingHandle,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Create a healthy node with nothing allocated
    pub fn new(
        id: NodeId,
        capacity: f64,
        backing: BackingHandle,
        auto_scaled: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            capacity,
            allocated: 0.0,
            status: NodeStatus::Healthy,
            pods: Vec::new(),
            auto_scaled,
            backing,
            created_at,
        }
    }

    /// Capacity not yet reserved by pods
    pub fn available(&self) -> f64 {
        self.capacity - self.allocated
    }

    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Healthy
    }

    /// Whether `cpu` more fits in the unreserved capacity, ignoring status
    pub fn has_room(&self, cpu: f64) -> bool {
        self.available() + CPU_TOLERANCE >= cpu
    }

    /// Whether the node is Healthy and can take `cpu` more
    pub fn fits(&self, cpu: f64) -> bool {
        self.is_healthy() && self.has_room(cpu)
    }

    pub fn is_idle(&self) -> bool {
        self.pods.is_empty()
    }

    /// Reserve capacity for a pod
    pub(crate) fn attach(&mut self, pod: PodId, cpu: f64) {
        self.allocated += cpu;
        self.pods.push(pod);
    }

    /// Release a pod's reservation; returns false if the pod was not hosted here
    pub(crate) fn detach(&mut self, pod: PodId, cpu: f64) -> bool {
        let before = self.pods.len();
        self.pods.retain(|p| *p != pod);
        if self.pods.len() == before {
            return false;
        }
        self.allocated = (self.allocated - cpu).max(0.0);
        if self.pods.is_empty() {
            self.allocated = 0.0;
        }
        true
    }

    /// Empty the node, returning the pods it hosted
    pub(crate) fn evict_all(&mut self) -> Vec<PodId> {
        self.allocated = 0.0;
        std::mem::take(&mut self.pods)
    }
}
