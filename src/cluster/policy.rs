//! Advisory network policies between pods
//!
//! Policies are recorded for inspection only; nothing in clusterlet
//! enforces them.

use serde::{Deserialize, Serialize};

use super::pod::PodId;
use super::resources::define_id;

define_id!(PolicyId, "policy");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub id: PolicyId,

    #[serde(rename = "sourcePod")]
    pub source: PodId,

    #[serde(rename = "targetPod")]
    pub target: PodId,

    pub effect: PolicyEffect,
}
