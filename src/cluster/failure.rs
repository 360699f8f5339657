//! Failure detector
//!
//! Once per reconciliation tick every node's last heartbeat is compared
//! against the node timeout. A stale Healthy node becomes Unresponsive and
//! its pods are rescheduled: each hosted pod is marked Failed and, when the
//! placement engine finds room elsewhere, a new pod with the same CPU
//! request is started on the chosen node. Workload with nowhere to go is
//! dropped; there is no retry queue.
//!
//! Only a heartbeat brings an Unresponsive node back to Healthy.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::node::NodeId;
use super::placement::{self, SchedulingStrategy};
use super::pod::PodId;
use super::store::{ClusterError, ClusterState};

/// What happened to one evicted pod
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RescheduleOutcome {
    /// Workload restarted as `replacement` on `node`
    Rescheduled {
        original: PodId,
        replacement: PodId,
        node: NodeId,
    },
    /// No Healthy node had room; the workload was dropped
    Dropped { original: PodId, cpu: f64 },
}

/// Result of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Nodes that were found stale and evacuated this sweep
    pub failed_nodes: Vec<NodeId>,
    pub outcomes: Vec<RescheduleOutcome>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.failed_nodes.is_empty()
    }

    pub fn rescheduled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RescheduleOutcome::Rescheduled { .. }))
            .count()
    }

    pub fn dropped(&self) -> usize {
        self.outcomes.len() - self.rescheduled()
    }
}

/// Whether `last_seen` is older than `timeout` at `now`
pub fn is_stale(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>, timeout: Duration) -> bool {
    last_seen.map_or(true, |seen| now - seen > timeout)
}

/// Detect timed-out nodes and reschedule their pods.
///
/// A node is evacuated when its heartbeat is stale and it is either still
/// Healthy or (after a simulated failure) Unresponsive but still hosting
/// pods. Nodes are visited in stable order.
pub fn sweep(
    state: &mut ClusterState,
    now: DateTime<Utc>,
    timeout: Duration,
    strategy: SchedulingStrategy,
) -> Result<SweepReport, ClusterError> {
    let stale: Vec<NodeId> = state
        .nodes()
        .filter(|n| n.is_healthy() || !n.is_idle())
        .filter(|n| is_stale(state.last_heartbeat(n.id), now, timeout))
        .map(|n| n.id)
        .collect();

    let mut report = SweepReport::default();

    for node_id in stale {
        let evicted = state.evict_node(node_id)?;
        info!(
            "Node {} marked as unresponsive, rescheduling {} pod(s)",
            node_id,
            evicted.len()
        );
        report.failed_nodes.push(node_id);

        for pod_id in evicted {
            let cpu = match state.pod(pod_id) {
                Some(pod) if pod.is_running() => pod.cpu,
                _ => continue,
            };

            // The evicted node is no longer Healthy, so it cannot be picked
            let outcome = match placement::select_node(strategy, cpu, state.nodes()) {
                Some(target) => {
                    let replacement = state.add_replacement_pod(target, cpu, now, pod_id)?;
                    state.mark_pod_failed(pod_id)?;
                    info!(
                        "Rescheduled pod {} as {} on {}",
                        pod_id, replacement, target
                    );
                    RescheduleOutcome::Rescheduled {
                        original: pod_id,
                        replacement,
                        node: target,
                    }
                }
                None => {
                    state.mark_pod_failed(pod_id)?;
                    warn!(
                        "No node can take pod {} ({} CPU) from {}; workload dropped",
                        pod_id, cpu, node_id
                    );
                    RescheduleOutcome::Dropped {
                        original: pod_id,
                        cpu,
                    }
                }
            };
            report.outcomes.push(outcome);
        }
    }

    Ok(report)
}
