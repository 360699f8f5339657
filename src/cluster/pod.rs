//! Pod resource - a workload unit consuming CPU on one node

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::NodeId;
use super::resources::define_id;

define_id!(PodId, "pod");

/// Lifecycle of a pod. Transitions only from Running to Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodStatus {
    Running,
    /// Kept as history, never revived
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: PodId,

    /// Requested CPU
    pub cpu: f64,

    /// Owning node; `None` once the pod has failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,

    pub status: PodStatus,

    /// The failed pod this one replaced during rescheduling
    #[serde(rename = "rescheduledFrom")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescheduled_from: Option<PodId>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Pod {
    pub fn new(id: PodId, cpu: f64, node: NodeId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            cpu,
            node: Some(node),
            status: PodStatus::Running,
            rescheduled_from: None,
            created_at,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == PodStatus::Running
    }

    /// Move to Failed, detaching from the node. Returns the node it ran on,
    /// or `None` if it had already failed.
    pub(crate) fn fail(&mut self) -> Option<NodeId> {
        if self.status == PodStatus::Failed {
            return None;
        }
        self.status = PodStatus::Failed;
        self.node.take()
    }
}
