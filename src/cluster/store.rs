//! Cluster state store
//!
//! The single authoritative registry of nodes, pods, heartbeats, usage
//! samples and network policies. It is plain data with no interior
//! locking; the [`ClusterController`](super::ClusterController) owns it
//! behind one exclusive lock and every read-modify-write happens while
//! that lock is held. Id counters live here for the same reason.
//!
//! Every fallible operation checks before it mutates, so an error always
//! leaves the store exactly as it was.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::node::{Node, NodeId, NodeStatus, CPU_TOLERANCE};
use super::placement::{self, SchedulingStrategy};
use super::pod::{Pod, PodId, PodStatus};
use super::policy::{NetworkPolicy, PolicyEffect, PolicyId};
use crate::runtime::{BackingHandle, ProvisionError};

/// Errors raised by cluster operations
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Node '{0}' not found")]
    NodeNotFound(NodeId),

    #[error("Node '{0}' still hosts {1} pod(s)")]
    NodeBusy(NodeId, usize),

    #[error("Insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("No suitable node for a pod requesting {0} CPU")]
    NoSuitableNode(f64),

    #[error("Pod '{0}' not found")]
    PodNotFound(PodId),

    #[error("Network policy references unknown pod '{0}'")]
    PolicyTargetMissing(PodId),

    #[error("Invalid resource request: {0}")]
    InvalidResource(String),

    #[error("Provisioner failure: {0}")]
    ProvisionerFailure(#[from] ProvisionError),

    #[error("Invalid controller configuration: {0}")]
    InvalidConfig(String),
}

/// Reject CPU amounts that are not finite and positive
pub fn validate_cpu(what: &str, cpu: f64) -> Result<(), ClusterError> {
    if cpu.is_finite() && cpu > 0.0 {
        Ok(())
    } else {
        Err(ClusterError::InvalidResource(format!(
            "{} must be a positive number, got {}",
            what, cpu
        )))
    }
}

/// Point-in-time counts over the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub unresponsive_nodes: usize,
    pub auto_scaled_nodes: usize,
    pub running_pods: usize,
    pub failed_pods: usize,
    pub network_policies: usize,
    /// Capacity summed over Healthy nodes
    pub healthy_capacity: f64,
    /// Allocation summed over Healthy nodes
    pub healthy_allocated: f64,
}

impl ClusterStats {
    /// Allocated / capacity over Healthy nodes; `None` if there is no capacity
    pub fn usage_ratio(&self) -> Option<f64> {
        (self.healthy_capacity > 0.0).then(|| self.healthy_allocated / self.healthy_capacity)
    }
}

#[derive(Debug, Default)]
pub struct ClusterState {
    nodes: BTreeMap<NodeId, Node>,
    pods: BTreeMap<PodId, Pod>,
    heartbeats: BTreeMap<NodeId, DateTime<Utc>>,
    usage: BTreeMap<PodId, f64>,
    policies: BTreeMap<PolicyId, NetworkPolicy>,
    /// Nodes being provisioned by the auto-scaler but not yet registered
    pending_nodes: usize,
    last_node_seq: u64,
    last_pod_seq: u64,
    last_policy_seq: u64,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Id generation
    // =========================================================================

    fn next_node_id(&mut self) -> NodeId {
        self.last_node_seq += 1;
        NodeId::from_sequence(self.last_node_seq)
    }

    fn next_pod_id(&mut self) -> PodId {
        self.last_pod_seq += 1;
        PodId::from_sequence(self.last_pod_seq)
    }

    fn next_policy_id(&mut self) -> PolicyId {
        self.last_policy_seq += 1;
        PolicyId::from_sequence(self.last_policy_seq)
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Register a Healthy node with zero allocation and a fresh heartbeat
    pub fn add_node(
        &mut self,
        capacity: f64,
        backing: BackingHandle,
        auto_scaled: bool,
        now: DateTime<Utc>,
    ) -> Result<NodeId, ClusterError> {
        validate_cpu("node capacity", capacity)?;

        let id = self.next_node_id();
        self.nodes
            .insert(id, Node::new(id, capacity, backing, auto_scaled, now));
        self.heartbeats.insert(id, now);
        Ok(id)
    }

    /// Delete an idle node and its heartbeat entry
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, ClusterError> {
        let node = self.nodes.get(&id).ok_or(ClusterError::NodeNotFound(id))?;
        if !node.is_idle() {
            return Err(ClusterError::NodeBusy(id, node.pods.len()));
        }

        self.heartbeats.remove(&id);
        self.nodes.remove(&id).ok_or(ClusterError::NodeNotFound(id))
    }

    /// Refresh a node's last-seen time and force it back to Healthy
    pub fn record_heartbeat(&mut self, id: NodeId, now: DateTime<Utc>) -> Result<(), ClusterError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(ClusterError::NodeNotFound(id))?;
        node.status = NodeStatus::Healthy;
        self.heartbeats.insert(id, now);
        Ok(())
    }

    /// Force a node Unresponsive and set its last-seen time to `last_seen`
    pub fn force_unresponsive(
        &mut self,
        id: NodeId,
        last_seen: DateTime<Utc>,
    ) -> Result<(), ClusterError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(ClusterError::NodeNotFound(id))?;
        node.status = NodeStatus::Unresponsive;
        self.heartbeats.insert(id, last_seen);
        Ok(())
    }

    /// Mark a node Unresponsive and strip it of its pods, releasing the
    /// allocation. Returns the evicted pod ids in placement order.
    pub(crate) fn evict_node(&mut self, id: NodeId) -> Result<Vec<PodId>, ClusterError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(ClusterError::NodeNotFound(id))?;
        node.status = NodeStatus::Unresponsive;
        Ok(node.evict_all())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// All nodes in stable (creation) order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn last_heartbeat(&self, id: NodeId) -> Option<DateTime<Utc>> {
        self.heartbeats.get(&id).copied()
    }

    /// Count a node that is being provisioned against the node-count bound
    pub(crate) fn reserve_node_slot(&mut self) {
        self.pending_nodes += 1;
    }

    pub(crate) fn release_node_slot(&mut self) {
        self.pending_nodes = self.pending_nodes.saturating_sub(1);
    }

    /// Reserved slots whose provisioning has not finished
    pub fn pending_nodes(&self) -> usize {
        self.pending_nodes
    }

    // =========================================================================
    // Pods
    // =========================================================================

    /// Place a new Running pod directly on `node`
    pub fn add_pod(
        &mut self,
        node: NodeId,
        cpu: f64,
        now: DateTime<Utc>,
    ) -> Result<PodId, ClusterError> {
        self.add_pod_inner(node, cpu, now, None)
    }

    /// Place a new Running pod on the node chosen by `strategy`
    pub fn schedule_pod(
        &mut self,
        strategy: SchedulingStrategy,
        cpu: f64,
        now: DateTime<Utc>,
    ) -> Result<(PodId, NodeId), ClusterError> {
        validate_cpu("pod CPU request", cpu)?;

        let node = placement::select_node(strategy, cpu, self.nodes.values())
            .ok_or(ClusterError::NoSuitableNode(cpu))?;
        let pod = self.add_pod_inner(node, cpu, now, None)?;
        Ok((pod, node))
    }

    /// Re-create the workload of `original` on `node` as a new pod
    pub(crate) fn add_replacement_pod(
        &mut self,
        node: NodeId,
        cpu: f64,
        now: DateTime<Utc>,
        original: PodId,
    ) -> Result<PodId, ClusterError> {
        self.add_pod_inner(node, cpu, now, Some(original))
    }

    fn add_pod_inner(
        &mut self,
        node_id: NodeId,
        cpu: f64,
        now: DateTime<Utc>,
        rescheduled_from: Option<PodId>,
    ) -> Result<PodId, ClusterError> {
        validate_cpu("pod CPU request", cpu)?;

        let node = self
            .nodes
            .get(&node_id)
            .ok_or(ClusterError::NodeNotFound(node_id))?;
        if !node.is_healthy() {
            return Err(ClusterError::InsufficientCapacity(format!(
                "node '{}' is {:?}",
                node_id, node.status
            )));
        }
        if !node.has_room(cpu) {
            return Err(ClusterError::InsufficientCapacity(format!(
                "node '{}' has {} CPU available, {} requested",
                node_id,
                node.available(),
                cpu
            )));
        }

        let pod_id = self.next_pod_id();
        let mut pod = Pod::new(pod_id, cpu, node_id, now);
        pod.rescheduled_from = rescheduled_from;
        self.pods.insert(pod_id, pod);
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.attach(pod_id, cpu);
        }
        Ok(pod_id)
    }

    /// Move a pod to Failed and release its node reservation if still held.
    /// Failing an already Failed pod is a no-op.
    pub fn mark_pod_failed(&mut self, id: PodId) -> Result<(), ClusterError> {
        let pod = self.pods.get_mut(&id).ok_or(ClusterError::PodNotFound(id))?;
        let cpu = pod.cpu;
        if let Some(node_id) = pod.fail() {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.detach(id, cpu);
            }
        }
        Ok(())
    }

    pub fn pod(&self, id: PodId) -> Option<&Pod> {
        self.pods.get(&id)
    }

    /// All pods, Running and Failed, in creation order
    pub fn pods(&self) -> impl Iterator<Item = &Pod> {
        self.pods.values()
    }

    pub fn running_pods(&self) -> impl Iterator<Item = &Pod> {
        self.pods.values().filter(|p| p.is_running())
    }

    // =========================================================================
    // Usage samples
    // =========================================================================

    pub fn usage(&self, id: PodId) -> Option<f64> {
        self.usage.get(&id).copied()
    }

    pub fn usage_samples(&self) -> &BTreeMap<PodId, f64> {
        &self.usage
    }

    /// Running pods as `(id, cpu request, current sample)`
    pub(crate) fn running_samples(&self) -> Vec<(PodId, f64, Option<f64>)> {
        self.running_pods()
            .map(|p| (p.id, p.cpu, self.usage.get(&p.id).copied()))
            .collect()
    }

    pub(crate) fn set_usage(&mut self, id: PodId, value: f64) {
        if self.pods.get(&id).is_some_and(Pod::is_running) {
            self.usage.insert(id, value);
        }
    }

    // =========================================================================
    // Network policies
    // =========================================================================

    /// Record an advisory policy; both pods must exist (Failed pods count)
    pub fn add_network_policy(
        &mut self,
        source: PodId,
        target: PodId,
        effect: PolicyEffect,
    ) -> Result<PolicyId, ClusterError> {
        for pod in [source, target] {
            if !self.pods.contains_key(&pod) {
                return Err(ClusterError::PolicyTargetMissing(pod));
            }
        }

        let id = self.next_policy_id();
        self.policies.insert(
            id,
            NetworkPolicy {
                id,
                source,
                target,
                effect,
            },
        );
        Ok(id)
    }

    pub fn policies(&self) -> impl Iterator<Item = &NetworkPolicy> {
        self.policies.values()
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn stats(&self) -> ClusterStats {
        let healthy = self.nodes.values().filter(|n| n.is_healthy());
        let (healthy_nodes, healthy_capacity, healthy_allocated) = healthy
            .fold((0, 0.0, 0.0), |(count, cap, alloc), n| {
                (count + 1, cap + n.capacity, alloc + n.allocated)
            });
        let running_pods = self.pods.values().filter(|p| p.is_running()).count();

        ClusterStats {
            total_nodes: self.nodes.len(),
            healthy_nodes,
            unresponsive_nodes: self.nodes.len() - healthy_nodes,
            auto_scaled_nodes: self.nodes.values().filter(|n| n.auto_scaled).count(),
            running_pods,
            failed_pods: self.pods.len() - running_pods,
            network_policies: self.policies.len(),
            healthy_capacity,
            healthy_allocated,
        }
    }

    /// Describe every broken structural invariant; empty when consistent
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for node in self.nodes.values() {
            if node.is_healthy() && node.allocated > node.capacity + CPU_TOLERANCE {
                problems.push(format!(
                    "{} allocated {} exceeds capacity {}",
                    node.id, node.allocated, node.capacity
                ));
            }
            let hosted: f64 = node
                .pods
                .iter()
                .filter_map(|p| self.pods.get(p))
                .map(|p| p.cpu)
                .sum();
            if (hosted - node.allocated).abs() > CPU_TOLERANCE {
                problems.push(format!(
                    "{} allocated {} but hosts {} CPU of pods",
                    node.id, node.allocated, hosted
                ));
            }
            if !self.heartbeats.contains_key(&node.id) {
                problems.push(format!("{} has no heartbeat entry", node.id));
            }
        }

        for pod in self.pods.values() {
            match (pod.status, pod.node) {
                (PodStatus::Running, Some(node_id)) => match self.nodes.get(&node_id) {
                    Some(node) if node.is_healthy() && node.pods.contains(&pod.id) => {}
                    Some(node) if !node.pods.contains(&pod.id) => {
                        problems.push(format!("{} is not listed on {}", pod.id, node_id))
                    }
                    Some(_) => problems.push(format!("{} runs on unhealthy {}", pod.id, node_id)),
                    None => problems.push(format!("{} runs on missing {}", pod.id, node_id)),
                },
                (PodStatus::Running, None) => {
                    problems.push(format!("{} is Running without a node", pod.id))
                }
                (PodStatus::Failed, Some(_)) => {
                    problems.push(format!("{} is Failed but still owns a node", pod.id))
                }
                (PodStatus::Failed, None) => {}
            }
        }

        problems
    }
}
