//! # Cluster Management
//!
//! A single control plane that tracks a pool of worker nodes, places
//! CPU-bound pods onto them and keeps the pool healthy.
//!
//! ## Components
//!
//! - **Store**: the authoritative in-memory registry of nodes, pods,
//!   heartbeats, usage samples and network policies
//! - **Placement**: first-fit, best-fit or worst-fit node selection
//! - **Failure detection**: heartbeat timeouts and pod rescheduling
//! - **Auto-scaler**: grows or shrinks the pool from aggregate allocation
//! - **Telemetry**: synthetic per-pod CPU usage
//! - **Reconciler**: the periodic loop driving the three phases above
//! - **Controller**: the operation surface, serializing every mutation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  clusterlet control plane                    │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ API Server   │─▶│ Cluster      │◀─│ Reconciler       │  │
//! │  │ :8181        │  │ Controller   │  │ (every 5s)       │  │
//! │  └──────────────┘  └──────┬───────┘  └──────────────────┘  │
//! └───────────────────────────┼─────────────────────────────────┘
//!                             │ provision / decommission
//!         ┌───────────────────┼────────────────────┐
//!         ▼                   ▼                    ▼
//!   ┌───────────┐       ┌───────────┐        ┌───────────┐
//!   │  node-1   │       │  node-2   │        │  node-3   │
//!   │ (docker)  │       │ (docker)  │        │ (auto)    │
//!   └───────────┘       └───────────┘        └───────────┘
//! ```
//!
//! Network policies are recorded for inspection only and are never
//! enforced. Nothing survives a restart.

pub mod api;
pub mod autoscaler;
pub mod controller;
pub mod failure;
pub mod node;
pub mod placement;
pub mod pod;
pub mod policy;
pub mod reconciler;
pub mod resources;
pub mod store;
pub mod telemetry;

pub use api::{create_control_plane_router, ControlPlaneState};
pub use autoscaler::{
    evaluate_scaling, AutoscalerConfig, AutoscalerState, ScalingAction, ScalingDecision,
};
pub use controller::{ClusterController, ClusterStatus, ControllerConfig};
pub use failure::{RescheduleOutcome, SweepReport};
pub use node::{Node, NodeId, NodeStatus};
pub use placement::{select_node, SchedulingStrategy};
pub use pod::{Pod, PodId, PodStatus};
pub use policy::{NetworkPolicy, PolicyEffect, PolicyId};
pub use reconciler::{run_tick, spawn_reconciler, TickReport};
pub use resources::*;
pub use store::{ClusterError, ClusterState, ClusterStats};

/// API version reported in list responses
pub const API_VERSION: &str = "clusterlet/v1";

/// Default control plane API port
pub const CONTROL_PLANE_PORT: u16 = 8181;

/// Default reconciliation interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Default heartbeat timeout in seconds
pub const NODE_TIMEOUT_SECS: u64 = 10;
