//! Cluster Controller - the operation surface of the control plane
//!
//! The controller is responsible for:
//! - Adding and removing nodes through the provisioner
//! - Launching pods through the placement engine
//! - Recording heartbeats and simulated failures
//! - Running the per-tick failure sweep, auto-scaler and telemetry phases
//!
//! All cluster state sits behind one exclusive lock. Every operation holds
//! it for its whole read-modify-write sequence, so a placement decision and
//! the matching allocation update can never interleave with another writer.
//! Provisioner calls are made with the lock released.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::autoscaler::{
    evaluate_scaling, AutoscalerConfig, AutoscalerState, ScalingAction, ScalingDecision,
};
use super::failure::{self, SweepReport};
use super::node::{Node, NodeId, NodeStatus};
use super::placement::SchedulingStrategy;
use super::pod::{Pod, PodId};
use super::policy::{NetworkPolicy, PolicyEffect, PolicyId};
use super::store::{validate_cpu, ClusterError, ClusterState, ClusterStats};
use super::telemetry;
use super::NODE_TIMEOUT_SECS;
use crate::runtime::{ProvisionSpec, Provisioner};

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Seconds without a heartbeat before a node is declared Unresponsive
    pub node_timeout_secs: u64,

    /// Placement strategy in effect at startup
    pub scheduling_strategy: SchedulingStrategy,

    pub autoscaler: AutoscalerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: NODE_TIMEOUT_SECS,
            scheduling_strategy: SchedulingStrategy::default(),
            autoscaler: AutoscalerConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Heartbeat timeout as a signed duration
    pub fn node_timeout(&self) -> Result<Duration, ClusterError> {
        i64::try_from(self.node_timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                ClusterError::InvalidConfig(format!(
                    "node timeout of {}s is out of range",
                    self.node_timeout_secs
                ))
            })
    }
}

/// Snapshot reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(flatten)]
    pub stats: ClusterStats,
    pub scheduling_strategy: SchedulingStrategy,
    pub autoscaling_enabled: bool,
    pub autoscaler: AutoscalerState,
    pub provisioner: &'static str,
    pub node_timeout_secs: u64,
}

/// The cluster controller owns all cluster state
#[derive(Clone)]
pub struct ClusterController {
    state: Arc<Mutex<ClusterState>>,

    provisioner: Arc<dyn Provisioner>,

    config: Arc<ControllerConfig>,

    strategy: Arc<RwLock<SchedulingStrategy>>,

    autoscaling: Arc<AtomicBool>,

    autoscaler_state: Arc<RwLock<AutoscalerState>>,
}

impl ClusterController {
    /// Create a controller with an empty cluster
    pub fn new(config: ControllerConfig, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState::new())),
            provisioner,
            strategy: Arc::new(RwLock::new(config.scheduling_strategy)),
            autoscaling: Arc::new(AtomicBool::new(config.autoscaler.enabled)),
            autoscaler_state: Arc::new(RwLock::new(AutoscalerState::new())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn provisioner_name(&self) -> &'static str {
        self.provisioner.name()
    }

    // =========================================================================
    // Node Management
    // =========================================================================

    /// Provision a backing unit and register it as a Healthy node
    ///
    /// Nothing is registered if provisioning fails.
    pub async fn add_node(&self, cpu: f64) -> Result<NodeId, ClusterError> {
        validate_cpu("node capacity", cpu)?;

        let handle = self
            .provisioner
            .provision(&ProvisionSpec::new(cpu, false))
            .await
            .map_err(|e| {
                error!("Failed to provision node with {} CPU: {}", cpu, e);
                ClusterError::from(e)
            })?;

        let mut state = self.state.lock().await;
        let id = state.add_node(cpu, handle.clone(), false, Utc::now())?;
        info!("Node {} added with {} CPU (backing {})", id, cpu, handle);
        Ok(id)
    }

    /// Remove an idle node and decommission its backing unit
    ///
    /// A decommission failure is logged; the node stays removed.
    pub async fn remove_node(&self, id: NodeId) -> Result<(), ClusterError> {
        let node = {
            let mut state = self.state.lock().await;
            state.remove_node(id)?
        };
        info!("Node {} removed", id);

        if let Err(e) = self.provisioner.decommission(&node.backing).await {
            warn!(
                "Failed to decommission backing {} of node {}: {}",
                node.backing, id, e
            );
        }
        Ok(())
    }

    /// Refresh a node's heartbeat, restoring it to Healthy
    pub async fn heartbeat(&self, id: NodeId) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        let recovering = state
            .node(id)
            .is_some_and(|n| n.status == NodeStatus::Unresponsive);

        state.record_heartbeat(id, Utc::now())?;

        if recovering {
            info!("Node {} is healthy again", id);
        } else {
            debug!("Heartbeat from node {}", id);
        }
        Ok(())
    }

    /// Force a node Unresponsive with a heartbeat just past the timeout
    ///
    /// Its pods are rescheduled by the next failure sweep.
    pub async fn simulate_node_failure(&self, id: NodeId) -> Result<(), ClusterError> {
        let timeout = self.config.node_timeout()?;
        let last_seen = Utc::now()
            .checked_sub_signed(timeout + Duration::seconds(1))
            .ok_or_else(|| {
                ClusterError::InvalidConfig(format!(
                    "node timeout of {}s reaches before the epoch",
                    self.config.node_timeout_secs
                ))
            })?;

        let mut state = self.state.lock().await;
        state.force_unresponsive(id, last_seen)?;
        warn!("Simulated failure of node {}", id);
        Ok(())
    }

    pub async fn get_node(&self, id: NodeId) -> Option<Node> {
        self.state.lock().await.node(id).cloned()
    }

    /// All nodes in creation order
    pub async fn list_nodes(&self) -> Vec<Node> {
        self.state.lock().await.nodes().cloned().collect()
    }

    // =========================================================================
    // Pod Management
    // =========================================================================

    /// Launch a pod, either on an explicit node or wherever the current
    /// strategy places it
    pub async fn launch_pod(&self, cpu: f64, node: Option<NodeId>) -> Result<PodId, ClusterError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let (pod, target) = match node {
            Some(target) => (state.add_pod(target, cpu, now)?, target),
            None => {
                let strategy = *self.strategy.read().await;
                state.schedule_pod(strategy, cpu, now)?
            }
        };

        info!("Pod {} launched on {} with {} CPU", pod, target, cpu);
        Ok(pod)
    }

    pub async fn get_pod(&self, id: PodId) -> Option<Pod> {
        self.state.lock().await.pod(id).cloned()
    }

    /// Pods in creation order; Failed pods are included only on request
    pub async fn list_pods(&self, include_failed: bool) -> Vec<Pod> {
        let state = self.state.lock().await;
        state
            .pods()
            .filter(|p| include_failed || p.is_running())
            .cloned()
            .collect()
    }

    /// Latest synthetic usage sample of a pod
    pub async fn pod_usage(&self, id: PodId) -> Option<f64> {
        self.state.lock().await.usage(id)
    }

    pub async fn usage_samples(&self) -> BTreeMap<PodId, f64> {
        self.state.lock().await.usage_samples().clone()
    }

    // =========================================================================
    // Network Policies
    // =========================================================================

    /// Record an advisory policy between two existing pods
    pub async fn add_network_policy(
        &self,
        source: PodId,
        target: PodId,
        effect: PolicyEffect,
    ) -> Result<PolicyId, ClusterError> {
        let mut state = self.state.lock().await;
        let id = state.add_network_policy(source, target, effect)?;
        info!(
            "Network policy {} recorded: {} -> {} ({:?})",
            id, source, target, effect
        );
        Ok(id)
    }

    pub async fn list_policies(&self) -> Vec<NetworkPolicy> {
        self.state.lock().await.policies().cloned().collect()
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Switch the placement strategy by name. Unknown names are ignored.
    /// Returns the strategy in effect afterwards.
    pub async fn set_scheduling_strategy(&self, name: &str) -> SchedulingStrategy {
        let mut current = self.strategy.write().await;
        match name.parse::<SchedulingStrategy>() {
            Ok(strategy) => {
                if *current != strategy {
                    info!("Scheduling strategy changed: {} -> {}", *current, strategy);
                }
                *current = strategy;
            }
            Err(e) => warn!("Ignoring strategy change: {}", e),
        }
        *current
    }

    pub async fn scheduling_strategy(&self) -> SchedulingStrategy {
        *self.strategy.read().await
    }

    /// Flip auto-scaling on or off and return the new setting
    pub fn toggle_autoscaling(&self) -> bool {
        let enabled = !self.autoscaling.fetch_xor(true, Ordering::SeqCst);
        info!(
            "Auto-scaling {}",
            if enabled { "enabled" } else { "disabled" }
        );
        enabled
    }

    pub fn autoscaling_enabled(&self) -> bool {
        self.autoscaling.load(Ordering::SeqCst)
    }

    pub async fn autoscaler_state(&self) -> AutoscalerState {
        self.autoscaler_state.read().await.clone()
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub async fn cluster_stats(&self) -> ClusterStats {
        self.state.lock().await.stats()
    }

    pub async fn status(&self) -> ClusterStatus {
        ClusterStatus {
            stats: self.cluster_stats().await,
            scheduling_strategy: self.scheduling_strategy().await,
            autoscaling_enabled: self.autoscaling_enabled(),
            autoscaler: self.autoscaler_state().await,
            provisioner: self.provisioner.name(),
            node_timeout_secs: self.config.node_timeout_secs,
        }
    }

    /// Describe any broken store invariant; empty when consistent
    pub async fn invariant_violations(&self) -> Vec<String> {
        self.state.lock().await.invariant_violations()
    }

    // =========================================================================
    // Reconciliation phases
    // =========================================================================

    /// Declare timed-out nodes Unresponsive and reschedule their pods
    pub async fn run_failure_sweep(&self) -> Result<SweepReport, ClusterError> {
        let timeout = self.config.node_timeout()?;
        let mut state = self.state.lock().await;
        let strategy = *self.strategy.read().await;

        let report = failure::sweep(&mut state, Utc::now(), timeout, strategy)?;
        if !report.is_empty() {
            info!(
                "Failure sweep: {} node(s) failed, {} pod(s) rescheduled, {} dropped",
                report.failed_nodes.len(),
                report.rescheduled(),
                report.dropped()
            );
        }
        Ok(report)
    }

    /// Evaluate and apply at most one scaling action
    ///
    /// Scale-up reserves a node slot under the store lock, then provisions
    /// with the lock released. The reservation counts toward `max_nodes`
    /// until the node is registered or provisioning fails.
    pub async fn run_autoscaler(&self) -> Result<ScalingDecision, ClusterError> {
        if !self.autoscaling_enabled() {
            return Ok(ScalingDecision::NoChange);
        }

        let mut state = self.state.lock().await;
        let decision = evaluate_scaling(&state, &self.config.autoscaler);
        self.autoscaler_state.write().await.last_ratio = state.stats().usage_ratio();

        match &decision {
            ScalingDecision::NoChange => {
                debug!("Auto-scaler: no change");
            }
            ScalingDecision::ScaleUp { cpu, reason } => {
                info!("Scaling up: {}", reason);
                state.reserve_node_slot();
                drop(state);

                let provisioned = self
                    .provisioner
                    .provision(&ProvisionSpec::new(*cpu, true))
                    .await;

                let mut state = self.state.lock().await;
                state.release_node_slot();
                let handle = provisioned.map_err(|e| {
                    error!("Auto-scaler failed to provision a node: {}", e);
                    ClusterError::from(e)
                })?;
                let registered = state.add_node(*cpu, handle.clone(), true, Utc::now());
                drop(state);

                let id = match registered {
                    Ok(id) => id,
                    Err(e) => {
                        error!("Auto-scaler could not register backing {}: {}", handle, e);
                        if let Err(cleanup) = self.provisioner.decommission(&handle).await {
                            warn!("Failed to decommission backing {}: {}", handle, cleanup);
                        }
                        return Err(e);
                    }
                };

                info!("Auto-scaled node {} added with {} CPU", id, cpu);
                self.autoscaler_state
                    .write()
                    .await
                    .record(ScalingAction::ScaleUp, id);
            }
            ScalingDecision::ScaleDown { node, reason } => {
                info!("Scaling down: {}", reason);
                let removed = state.remove_node(*node)?;
                drop(state);

                info!("Auto-scaled node {} removed", node);
                if let Err(e) = self.provisioner.decommission(&removed.backing).await {
                    warn!(
                        "Failed to decommission backing {} of node {}: {}",
                        removed.backing, node, e
                    );
                }
                self.autoscaler_state
                    .write()
                    .await
                    .record(ScalingAction::ScaleDown, *node);
            }
        }

        Ok(decision)
    }

    /// Advance synthetic usage of every Running pod; returns pods sampled
    pub async fn run_telemetry(&self) -> usize {
        let mut state = self.state.lock().await;
        let sampled = telemetry::update_usage(&mut state, &mut rand::rng());
        debug!("Telemetry updated {} pod(s)", sampled);
        sampled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::pod::PodStatus;
    use crate::runtime::{BackingHandle, ProvisionError, SimulatedProvisioner};
    use async_trait::async_trait;
    use futures::future::join_all;
    use tokio::sync::Notify;

    fn make_controller(config: ControllerConfig) -> (ClusterController, Arc<SimulatedProvisioner>) {
        let provisioner = Arc::new(SimulatedProvisioner::new());
        let controller = ClusterController::new(config, provisioner.clone());
        (controller, provisioner)
    }

    fn autoscaling_config() -> ControllerConfig {
        ControllerConfig {
            autoscaler: AutoscalerConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Holds auto-scaled provisioning until the test releases it
    #[derive(Default)]
    struct GatedProvisioner {
        inner: SimulatedProvisioner,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Provisioner for GatedProvisioner {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn provision(&self, spec: &ProvisionSpec) -> Result<BackingHandle, ProvisionError> {
            if spec.auto_scaled {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.provision(spec).await
        }

        async fn decommission(&self, handle: &BackingHandle) -> Result<(), ProvisionError> {
            self.inner.decommission(handle).await
        }
    }

    #[tokio::test]
    async fn test_add_node_provisions_backing() {
        let (controller, provisioner) = make_controller(ControllerConfig::default());

        let id = controller.add_node(4.0).await.unwrap();

        assert_eq!(id.to_string(), "node-1");
        let node = controller.get_node(id).await.unwrap();
        assert!(node.is_healthy());
        assert!(!node.auto_scaled);
        assert!(provisioner.is_live(&node.backing));
    }

    #[tokio::test]
    async fn test_add_node_provisioner_failure_registers_nothing() {
        let (controller, provisioner) = make_controller(ControllerConfig::default());
        provisioner.set_fail_provision(true);

        let result = controller.add_node(4.0).await;

        assert!(matches!(result, Err(ClusterError::ProvisionerFailure(_))));
        assert!(controller.list_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_node_rejects_bad_capacity_before_provisioning() {
        let (controller, provisioner) = make_controller(ControllerConfig::default());

        let result = controller.add_node(-2.0).await;

        assert!(matches!(result, Err(ClusterError::InvalidResource(_))));
        assert_eq!(provisioner.live_units(), 0);
    }

    #[tokio::test]
    async fn test_remove_node_decommissions() {
        let (controller, provisioner) = make_controller(ControllerConfig::default());
        let id = controller.add_node(4.0).await.unwrap();

        controller.remove_node(id).await.unwrap();

        assert!(controller.get_node(id).await.is_none());
        assert_eq!(provisioner.live_units(), 0);
    }

    #[tokio::test]
    async fn test_remove_node_survives_decommission_failure() {
        let (controller, provisioner) = make_controller(ControllerConfig::default());
        let id = controller.add_node(4.0).await.unwrap();
        provisioner.set_fail_decommission(true);

        controller.remove_node(id).await.unwrap();

        assert!(controller.get_node(id).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_busy_node_is_rejected() {
        let (controller, provisioner) = make_controller(ControllerConfig::default());
        let id = controller.add_node(4.0).await.unwrap();
        controller.launch_pod(1.0, Some(id)).await.unwrap();

        let result = controller.remove_node(id).await;

        assert!(matches!(result, Err(ClusterError::NodeBusy(_, 1))));
        assert_eq!(controller.list_nodes().await.len(), 1);
        assert_eq!(provisioner.live_units(), 1);
    }

    #[tokio::test]
    async fn test_launch_pod_uses_current_strategy() {
        let (controller, _) = make_controller(ControllerConfig::default());
        let big = controller.add_node(10.0).await.unwrap();
        let small = controller.add_node(4.0).await.unwrap();

        let p1 = controller.launch_pod(2.0, None).await.unwrap();
        assert_eq!(controller.get_pod(p1).await.unwrap().node, Some(small));

        controller.set_scheduling_strategy("worst-fit").await;
        let p2 = controller.launch_pod(2.0, None).await.unwrap();
        assert_eq!(controller.get_pod(p2).await.unwrap().node, Some(big));
        assert!(controller.invariant_violations().await.is_empty());
    }

    #[tokio::test]
    async fn test_launch_pod_errors() {
        let (controller, _) = make_controller(ControllerConfig::default());
        let id = controller.add_node(2.0).await.unwrap();

        assert!(matches!(
            controller.launch_pod(3.0, None).await,
            Err(ClusterError::NoSuitableNode(_))
        ));
        assert!(matches!(
            controller.launch_pod(3.0, Some(id)).await,
            Err(ClusterError::InsufficientCapacity(_))
        ));
        assert!(matches!(
            controller
                .launch_pod(1.0, Some(NodeId::from_sequence(9)))
                .await,
            Err(ClusterError::NodeNotFound(_))
        ));
        assert!(controller.list_pods(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_strategy_is_ignored() {
        let (controller, _) = make_controller(ControllerConfig::default());

        assert_eq!(
            controller.set_scheduling_strategy("first-fit").await,
            SchedulingStrategy::FirstFit
        );
        assert_eq!(
            controller.set_scheduling_strategy("random").await,
            SchedulingStrategy::FirstFit
        );
    }

    #[tokio::test]
    async fn test_toggle_autoscaling() {
        let (controller, _) = make_controller(ControllerConfig::default());
        assert!(!controller.autoscaling_enabled());

        assert!(controller.toggle_autoscaling());
        assert!(controller.autoscaling_enabled());
        assert!(!controller.toggle_autoscaling());
    }

    #[tokio::test]
    async fn test_simulated_failure_then_sweep_reschedules() {
        let (controller, _) = make_controller(ControllerConfig::default());
        let n1 = controller.add_node(4.0).await.unwrap();
        let n2 = controller.add_node(4.0).await.unwrap();
        let pod = controller.launch_pod(2.0, Some(n1)).await.unwrap();

        controller.simulate_node_failure(n1).await.unwrap();
        assert_eq!(
            controller.get_node(n1).await.unwrap().status,
            NodeStatus::Unresponsive
        );

        let report = controller.run_failure_sweep().await.unwrap();
        assert_eq!(report.rescheduled(), 1);

        assert_eq!(
            controller.get_pod(pod).await.unwrap().status,
            PodStatus::Failed
        );
        let running = controller.list_pods(false).await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].node, Some(n2));

        // A heartbeat brings the node back, empty
        controller.heartbeat(n1).await.unwrap();
        let node = controller.get_node(n1).await.unwrap();
        assert!(node.is_healthy());
        assert!(node.is_idle());
        assert!(controller.invariant_violations().await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_timeout_is_an_error() {
        let config = ControllerConfig {
            node_timeout_secs: 10_000_000_000_000_000,
            ..Default::default()
        };
        assert!(config.node_timeout().is_err());
        let (controller, _) = make_controller(config);
        let node = controller.add_node(4.0).await.unwrap();

        assert!(matches!(
            controller.simulate_node_failure(node).await,
            Err(ClusterError::InvalidConfig(_))
        ));
        assert!(matches!(
            controller.run_failure_sweep().await,
            Err(ClusterError::InvalidConfig(_))
        ));
        assert!(controller.get_node(node).await.unwrap().is_healthy());

        // Representable, but reaching back past the earliest timestamp
        let config = ControllerConfig {
            node_timeout_secs: 1_000_000_000_000_000,
            ..Default::default()
        };
        let (controller, _) = make_controller(config);
        let node = controller.add_node(4.0).await.unwrap();
        assert!(matches!(
            controller.simulate_node_failure(node).await,
            Err(ClusterError::InvalidConfig(_))
        ));

        let config = ControllerConfig {
            node_timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert!(config.node_timeout().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_launches_never_overcommit() {
        let (controller, _) = make_controller(ControllerConfig::default());
        let big = controller.add_node(10.0).await.unwrap();
        let small = controller.add_node(2.5).await.unwrap();

        let launches = (0..40).map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.launch_pod(0.5, None).await })
        });
        let launched = join_all(launches)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(Result::is_ok)
            .count();

        // floor(10 / 0.5) + floor(2.5 / 0.5)
        assert_eq!(launched, 25);
        assert_eq!(controller.list_pods(false).await.len(), 25);
        for id in [big, small] {
            let node = controller.get_node(id).await.unwrap();
            assert!(node.allocated <= node.capacity);
            assert_eq!(node.allocated, node.capacity);
        }
        assert!(controller.invariant_violations().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_heartbeats_race_failure_sweeps() {
        let (controller, _) = make_controller(ControllerConfig::default());
        let n1 = controller.add_node(4.0).await.unwrap();
        controller.add_node(4.0).await.unwrap();
        let pod = controller.launch_pod(2.0, Some(n1)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let c = controller.clone();
            tasks.push(tokio::spawn(async move { c.heartbeat(n1).await }));
            let c = controller.clone();
            tasks.push(tokio::spawn(async move { c.run_failure_sweep().await.map(|_| ()) }));
        }
        for joined in join_all(tasks).await {
            joined.unwrap().unwrap();
        }

        // Fresh heartbeats: nothing is ever declared failed
        assert!(controller.get_node(n1).await.unwrap().is_healthy());
        let pods = controller.list_pods(true).await;
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].id, pod);
        assert_eq!(pods[0].node, Some(n1));

        // From a failed node either side may win, but the store stays whole
        controller.simulate_node_failure(n1).await.unwrap();
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let c = controller.clone();
            tasks.push(tokio::spawn(async move { c.run_failure_sweep().await.map(|_| ()) }));
            let c = controller.clone();
            tasks.push(tokio::spawn(async move { c.heartbeat(n1).await }));
        }
        for joined in join_all(tasks).await {
            joined.unwrap().unwrap();
        }

        assert!(controller.get_node(n1).await.unwrap().is_healthy());
        assert_eq!(controller.list_pods(false).await.len(), 1);
        assert!(controller.invariant_violations().await.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_node() {
        let (controller, _) = make_controller(ControllerConfig::default());
        let result = controller.heartbeat(NodeId::from_sequence(1)).await;
        assert!(matches!(result, Err(ClusterError::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_network_policy_leaves_store_untouched_on_error() {
        let (controller, _) = make_controller(ControllerConfig::default());
        let node = controller.add_node(4.0).await.unwrap();
        let pod = controller.launch_pod(1.0, Some(node)).await.unwrap();

        let result = controller
            .add_network_policy(pod, PodId::from_sequence(50), PolicyEffect::Deny)
            .await;
        assert!(matches!(result, Err(ClusterError::PolicyTargetMissing(_))));
        assert!(controller.list_policies().await.is_empty());

        controller
            .add_network_policy(pod, pod, PolicyEffect::Allow)
            .await
            .unwrap();
        assert_eq!(controller.list_policies().await.len(), 1);
    }

    #[tokio::test]
    async fn test_autoscaler_disabled_is_noop() {
        let (controller, provisioner) = make_controller(ControllerConfig::default());
        let node = controller.add_node(4.0).await.unwrap();
        controller.launch_pod(4.0, Some(node)).await.unwrap();

        let decision = controller.run_autoscaler().await.unwrap();

        assert_eq!(decision, ScalingDecision::NoChange);
        assert_eq!(provisioner.live_units(), 1);
    }

    #[tokio::test]
    async fn test_autoscale_up_adds_empty_node() {
        let (controller, _) = make_controller(autoscaling_config());
        let n1 = controller.add_node(6.0).await.unwrap();
        let n2 = controller.add_node(4.0).await.unwrap();
        controller.launch_pod(5.0, Some(n1)).await.unwrap();
        controller.launch_pod(4.0, Some(n2)).await.unwrap();

        let decision = controller.run_autoscaler().await.unwrap();
        assert!(matches!(decision, ScalingDecision::ScaleUp { .. }));

        let nodes = controller.list_nodes().await;
        assert_eq!(nodes.len(), 3);
        let added = &nodes[2];
        assert!(added.auto_scaled);
        assert!(added.is_healthy());
        assert_eq!(added.capacity, 4.0);
        assert_eq!(added.allocated, 0.0);

        let state = controller.autoscaler_state().await;
        assert_eq!(state.last_action, Some(ScalingAction::ScaleUp));
        assert_eq!(state.last_node, Some(added.id));
    }

    #[tokio::test]
    async fn test_autoscale_up_provisioner_failure() {
        let (controller, provisioner) = make_controller(autoscaling_config());
        let n1 = controller.add_node(4.0).await.unwrap();
        controller.launch_pod(4.0, Some(n1)).await.unwrap();
        provisioner.set_fail_provision(true);

        let result = controller.run_autoscaler().await;

        assert!(matches!(result, Err(ClusterError::ProvisionerFailure(_))));
        assert_eq!(controller.list_nodes().await.len(), 1);
        assert_eq!(controller.state.lock().await.pending_nodes(), 0);
        assert!(controller.autoscaler_state().await.last_action.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scale_up_provisions_without_holding_the_store() {
        let provisioner = Arc::new(GatedProvisioner::default());
        let config = ControllerConfig {
            autoscaler: AutoscalerConfig {
                enabled: true,
                max_nodes: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let controller = ClusterController::new(config, provisioner.clone());
        let n1 = controller.add_node(4.0).await.unwrap();
        let n2 = controller.add_node(4.0).await.unwrap();
        controller.launch_pod(4.0, Some(n1)).await.unwrap();
        controller.launch_pod(4.0, Some(n2)).await.unwrap();

        let scaling = tokio::spawn({
            let controller = controller.clone();
            async move { controller.run_autoscaler().await }
        });
        provisioner.entered.notified().await;

        // Heartbeats and reads proceed while the node is being provisioned
        tokio::time::timeout(std::time::Duration::from_secs(1), controller.heartbeat(n1))
            .await
            .expect("store lock held across provisioning")
            .unwrap();
        assert_eq!(controller.list_nodes().await.len(), 2);

        // The reserved slot already counts against max-nodes
        assert_eq!(controller.state.lock().await.pending_nodes(), 1);
        assert_eq!(
            controller.run_autoscaler().await.unwrap(),
            ScalingDecision::NoChange
        );

        provisioner.release.notify_one();
        let decision = scaling.await.unwrap().unwrap();

        assert!(matches!(decision, ScalingDecision::ScaleUp { .. }));
        assert_eq!(controller.list_nodes().await.len(), 3);
        assert_eq!(controller.state.lock().await.pending_nodes(), 0);
        assert!(controller.invariant_violations().await.is_empty());
    }

    #[tokio::test]
    async fn test_autoscale_down_removes_idle_auto_scaled_node() {
        let (controller, provisioner) = make_controller(autoscaling_config());
        let n1 = controller.add_node(4.0).await.unwrap();
        let n2 = controller.add_node(4.0).await.unwrap();
        controller.launch_pod(4.0, Some(n1)).await.unwrap();
        controller.launch_pod(4.0, Some(n2)).await.unwrap();

        // Full cluster scales up once
        controller.run_autoscaler().await.unwrap();
        assert_eq!(provisioner.live_units(), 3);

        // Drain the manual nodes; the new node is idle and auto-scaled
        let pods = controller.list_pods(false).await;
        for pod in &pods {
            let mut state = controller.state.lock().await;
            state.mark_pod_failed(pod.id).unwrap();
        }

        let decision = controller.run_autoscaler().await.unwrap();
        assert!(matches!(decision, ScalingDecision::ScaleDown { .. }));
        assert_eq!(controller.list_nodes().await.len(), 2);
        assert_eq!(provisioner.live_units(), 2);

        // At min nodes nothing else happens
        let decision = controller.run_autoscaler().await.unwrap();
        assert_eq!(decision, ScalingDecision::NoChange);
    }

    #[tokio::test]
    async fn test_telemetry_samples_running_pods() {
        let (controller, _) = make_controller(ControllerConfig::default());
        let node = controller.add_node(8.0).await.unwrap();
        let pod = controller.launch_pod(2.0, Some(node)).await.unwrap();

        assert_eq!(controller.run_telemetry().await, 1);

        let usage = controller.pod_usage(pod).await.unwrap();
        assert!((0.6..=1.8).contains(&usage));
    }

    #[tokio::test]
    async fn test_status_reports_settings() {
        let (controller, _) = make_controller(ControllerConfig::default());
        controller.add_node(4.0).await.unwrap();

        let status = controller.status().await;
        assert_eq!(status.stats.total_nodes, 1);
        assert_eq!(status.scheduling_strategy, SchedulingStrategy::BestFit);
        assert!(!status.autoscaling_enabled);
        assert_eq!(status.provisioner, "simulated");
        assert_eq!(status.node_timeout_secs, 10);
    }
}
