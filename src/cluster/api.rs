//! Control Plane API Server
//!
//! Provides REST endpoints over the cluster controller:
//! - Nodes: add, list, get, remove, heartbeat, simulated failure
//! - Pods: launch, list, get (with the latest usage sample)
//! - Policies: record, list
//! - Settings: scheduling strategy, auto-scaling toggle
//! - Status: cluster health

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use super::{
    controller::ClusterController,
    node::{Node, NodeId},
    placement::SchedulingStrategy,
    pod::{Pod, PodId},
    policy::{NetworkPolicy, PolicyEffect},
    resources::{OperationStatus, ResourceList},
    store::ClusterError,
};

/// Shared state for the control plane API
#[derive(Clone)]
pub struct ControlPlaneState {
    pub controller: ClusterController,
}

impl ControlPlaneState {
    pub fn new(controller: ClusterController) -> Self {
        Self { controller }
    }
}

/// Create the control plane router
pub fn create_control_plane_router(state: ControlPlaneState) -> Router {
    Router::new()
        // Cluster status
        .route("/v1/status", get(cluster_status))
        // Nodes
        .route("/v1/nodes", get(list_nodes).post(add_node))
        .route("/v1/nodes/{id}", get(get_node).delete(remove_node))
        .route("/v1/nodes/{id}/heartbeat", post(node_heartbeat))
        .route("/v1/nodes/{id}/fail", post(fail_node))
        // Pods
        .route("/v1/pods", get(list_pods).post(launch_pod))
        .route("/v1/pods/{id}", get(get_pod))
        // Network policies
        .route("/v1/policies", get(list_policies).post(add_policy))
        // Settings
        .route(
            "/v1/scheduling",
            get(get_scheduling).put(set_scheduling),
        )
        .route("/v1/autoscaling/toggle", post(toggle_autoscaling))
        // Health check
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Error mapping
// ============================================================================

/// HTTP status for a controller error
pub fn error_status(error: &ClusterError) -> StatusCode {
    match error {
        ClusterError::NodeNotFound(_) | ClusterError::PodNotFound(_) => StatusCode::NOT_FOUND,
        ClusterError::NodeBusy(..)
        | ClusterError::InsufficientCapacity(_)
        | ClusterError::NoSuitableNode(_) => StatusCode::CONFLICT,
        ClusterError::PolicyTargetMissing(_) | ClusterError::InvalidResource(_) => {
            StatusCode::BAD_REQUEST
        }
        ClusterError::ProvisionerFailure(_) => StatusCode::BAD_GATEWAY,
        ClusterError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: ClusterError) -> Response {
    (
        error_status(&error),
        Json(OperationStatus::failure(error.to_string())),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(OperationStatus::failure(message)),
    )
        .into_response()
}

fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| bad_request(format!("Invalid id '{}': {}", raw, e)))
}

// ============================================================================
// Health & Status
// ============================================================================

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn cluster_status(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(state.controller.status().await)
}

// ============================================================================
// Node Endpoints
// ============================================================================

async fn list_nodes(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let nodes = state.controller.list_nodes().await;
    Json(ResourceList::new("NodeList", nodes))
}

#[derive(Deserialize)]
struct AddNodeRequest {
    cpu: f64,
}

#[derive(Serialize)]
struct NodeResponse {
    success: bool,
    node: Node,
}

async fn add_node(
    State(state): State<ControlPlaneState>,
    Json(req): Json<AddNodeRequest>,
) -> Response {
    let id = match state.controller.add_node(req.cpu).await {
        Ok(id) => id,
        Err(e) => return failure(e),
    };

    match state.controller.get_node(id).await {
        Some(node) => (
            StatusCode::CREATED,
            Json(NodeResponse {
                success: true,
                node,
            }),
        )
            .into_response(),
        // Removed concurrently between the two calls
        None => failure(ClusterError::NodeNotFound(id)),
    }
}

async fn get_node(State(state): State<ControlPlaneState>, Path(raw): Path<String>) -> Response {
    let id: NodeId = match parse_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.controller.get_node(id).await {
        Some(node) => (StatusCode::OK, Json(node)).into_response(),
        None => failure(ClusterError::NodeNotFound(id)),
    }
}

async fn remove_node(State(state): State<ControlPlaneState>, Path(raw): Path<String>) -> Response {
    let id: NodeId = match parse_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.controller.remove_node(id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(OperationStatus::success(format!("Node {} removed", id))),
        )
            .into_response(),
        Err(e) => failure(e),
    }
}

async fn node_heartbeat(
    State(state): State<ControlPlaneState>,
    Path(raw): Path<String>,
) -> Response {
    let id: NodeId = match parse_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.controller.heartbeat(id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(OperationStatus::success("Heartbeat received")),
        )
            .into_response(),
        Err(e) => failure(e),
    }
}

async fn fail_node(State(state): State<ControlPlaneState>, Path(raw): Path<String>) -> Response {
    let id: NodeId = match parse_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.controller.simulate_node_failure(id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(OperationStatus::success(format!(
                "Node {} marked unresponsive",
                id
            ))),
        )
            .into_response(),
        Err(e) => failure(e),
    }
}

// ============================================================================
// Pod Endpoints
// ============================================================================

/// A pod together with its latest synthetic usage sample
#[derive(Serialize)]
struct PodView {
    #[serde(flatten)]
    pod: Pod,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<f64>,
}

#[derive(Deserialize)]
struct ListPodsQuery {
    #[serde(default)]
    all: bool,
}

async fn list_pods(
    State(state): State<ControlPlaneState>,
    Query(query): Query<ListPodsQuery>,
) -> impl IntoResponse {
    let pods = state.controller.list_pods(query.all).await;
    let usage = state.controller.usage_samples().await;

    let items = pods
        .into_iter()
        .map(|pod| PodView {
            usage: usage.get(&pod.id).copied(),
            pod,
        })
        .collect();
    Json(ResourceList::new("PodList", items))
}

#[derive(Deserialize)]
struct LaunchPodRequest {
    cpu: f64,
    #[serde(default)]
    node: Option<NodeId>,
}

#[derive(Serialize)]
struct PodResponse {
    success: bool,
    pod: Pod,
}

async fn launch_pod(
    State(state): State<ControlPlaneState>,
    Json(req): Json<LaunchPodRequest>,
) -> Response {
    let id = match state.controller.launch_pod(req.cpu, req.node).await {
        Ok(id) => id,
        Err(e) => return failure(e),
    };

    match state.controller.get_pod(id).await {
        Some(pod) => (
            StatusCode::CREATED,
            Json(PodResponse { success: true, pod }),
        )
            .into_response(),
        None => failure(ClusterError::PodNotFound(id)),
    }
}

async fn get_pod(State(state): State<ControlPlaneState>, Path(raw): Path<String>) -> Response {
    let id: PodId = match parse_id(&raw) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.controller.get_pod(id).await {
        Some(pod) => {
            let usage = state.controller.pod_usage(id).await;
            (StatusCode::OK, Json(PodView { pod, usage })).into_response()
        }
        None => failure(ClusterError::PodNotFound(id)),
    }
}

// ============================================================================
// Network Policy Endpoints
// ============================================================================

async fn list_policies(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    let policies = state.controller.list_policies().await;
    Json(ResourceList::new("NetworkPolicyList", policies))
}

#[derive(Deserialize)]
struct AddPolicyRequest {
    #[serde(rename = "sourcePod")]
    source: PodId,
    #[serde(rename = "targetPod")]
    target: PodId,
    #[serde(default)]
    effect: PolicyEffect,
}

#[derive(Serialize)]
struct PolicyResponse {
    success: bool,
    policy: NetworkPolicy,
}

async fn add_policy(
    State(state): State<ControlPlaneState>,
    Json(req): Json<AddPolicyRequest>,
) -> Response {
    match state
        .controller
        .add_network_policy(req.source, req.target, req.effect)
        .await
    {
        Ok(id) => {
            let policy = NetworkPolicy {
                id,
                source: req.source,
                target: req.target,
                effect: req.effect,
            };
            (
                StatusCode::CREATED,
                Json(PolicyResponse {
                    success: true,
                    policy,
                }),
            )
                .into_response()
        }
        Err(e) => failure(e),
    }
}

// ============================================================================
// Settings Endpoints
// ============================================================================

#[derive(Serialize)]
struct SchedulingResponse {
    strategy: SchedulingStrategy,
    available: Vec<SchedulingStrategy>,
}

impl SchedulingResponse {
    fn new(strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            available: SchedulingStrategy::ALL.to_vec(),
        }
    }
}

async fn get_scheduling(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(SchedulingResponse::new(
        state.controller.scheduling_strategy().await,
    ))
}

#[derive(Deserialize)]
struct SetSchedulingRequest {
    strategy: String,
}

/// Unknown strategy names are ignored; the response shows what is in effect
async fn set_scheduling(
    State(state): State<ControlPlaneState>,
    Json(req): Json<SetSchedulingRequest>,
) -> impl IntoResponse {
    let strategy = state
        .controller
        .set_scheduling_strategy(&req.strategy)
        .await;
    Json(SchedulingResponse::new(strategy))
}

#[derive(Serialize)]
struct AutoscalingResponse {
    enabled: bool,
}

async fn toggle_autoscaling(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(AutoscalingResponse {
        enabled: state.controller.toggle_autoscaling(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::controller::ControllerConfig;
    use crate::runtime::{ProvisionError, SimulatedProvisioner};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_app() -> Router {
        let controller = ClusterController::new(
            ControllerConfig::default(),
            Arc::new(SimulatedProvisioner::new()),
        );
        create_control_plane_router(ControlPlaneState::new(controller))
    }

    #[test]
    fn test_error_status_mapping() {
        let node = NodeId::from_sequence(1);
        let pod = PodId::from_sequence(1);

        assert_eq!(
            error_status(&ClusterError::NodeNotFound(node)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&ClusterError::PodNotFound(pod)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&ClusterError::NodeBusy(node, 2)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&ClusterError::NoSuitableNode(1.0)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&ClusterError::PolicyTargetMissing(pod)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&ClusterError::ProvisionerFailure(ProvisionError::Unavailable(
                "down".to_string()
            ))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&ClusterError::InvalidConfig("timeout".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cluster_status() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_node_bad_id() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/nodes/pod-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_missing_pod() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/pods/pod-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
