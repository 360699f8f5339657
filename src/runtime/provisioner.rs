//! Compute provisioner contract
//!
//! The cluster core never knows how a node's backing unit is implemented.
//! It only asks a [`Provisioner`] to create one when a node is added and to
//! tear it down when the node goes away.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a provisioner backend
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Provisioner unavailable: {0}")]
    Unavailable(String),

    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the core asks for when it needs a new backing unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionSpec {
    /// CPU capacity the node will advertise
    pub cpu: f64,

    /// Whether the autoscaler requested this unit
    #[serde(rename = "autoScaled")]
    pub auto_scaled: bool,
}

impl ProvisionSpec {
    pub fn new(cpu: f64, auto_scaled: bool) -> Self {
        Self { cpu, auto_scaled }
    }
}

/// Opaque reference to a provisioned backing unit (container id, VM id...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackingHandle(String);

impl BackingHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Creates and destroys the execution units that back cluster nodes
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn provision(&self, spec: &ProvisionSpec) -> Result<BackingHandle, ProvisionError>;

    async fn decommission(&self, handle: &BackingHandle) -> Result<(), ProvisionError>;
}

/// In-process provisioner that hands out synthetic handles
///
/// Used by `--provisioner simulated` and throughout the tests. Failures can
/// be injected to exercise the error paths of add-node and autoscaling.
#[derive(Debug, Default)]
pub struct SimulatedProvisioner {
    next_id: AtomicU64,
    live: Mutex<BTreeSet<BackingHandle>>,
    fail_provision: AtomicBool,
    fail_decommission: AtomicBool,
}

impl SimulatedProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `provision` call fail (or succeed again)
    pub fn set_fail_provision(&self, fail: bool) {
        self.fail_provision.store(fail, Ordering::SeqCst);
    }

    /// Make every following `decommission` call fail (or succeed again)
    pub fn set_fail_decommission(&self, fail: bool) {
        self.fail_decommission.store(fail, Ordering::SeqCst);
    }

    /// Number of units currently provisioned and not yet decommissioned
    pub fn live_units(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }

    /// Whether the given handle is still live
    pub fn is_live(&self, handle: &BackingHandle) -> bool {
        self.live
            .lock()
            .map(|live| live.contains(handle))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn provision(&self, _spec: &ProvisionSpec) -> Result<BackingHandle, ProvisionError> {
        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(ProvisionError::Unavailable(
                "simulated provisioning failure".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = BackingHandle::new(format!("sim-{:06}", id));
        self.live
            .lock()
            .map_err(|_| ProvisionError::Unavailable("simulated state poisoned".to_string()))?
            .insert(handle.clone());
        Ok(handle)
    }

    async fn decommission(&self, handle: &BackingHandle) -> Result<(), ProvisionError> {
        if self.fail_decommission.load(Ordering::SeqCst) {
            return Err(ProvisionError::Unavailable(
                "simulated decommission failure".to_string(),
            ));
        }

        let removed = self
            .live
            .lock()
            .map_err(|_| ProvisionError::Unavailable("simulated state poisoned".to_string()))?
            .remove(handle);
        if removed {
            Ok(())
        } else {
            Err(ProvisionError::CommandFailed {
                command: "decommission".to_string(),
                message: format!("unknown unit {}", handle),
            })
        }
    }
}
