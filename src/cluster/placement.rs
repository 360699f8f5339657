//! Placement engine
//!
//! Chooses a target node for a CPU request. Candidates are visited in
//! stable (creation) order and only Healthy nodes with enough available
//! capacity qualify. Ties always go to the earliest node, so best-fit and
//! worst-fit differ only in the comparison they apply.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::node::{Node, NodeId};

/// Placement policy, selectable at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingStrategy {
    /// First node with room
    FirstFit,
    /// Node left with the least room (tightest fit)
    #[default]
    BestFit,
    /// Node left with the most room
    WorstFit,
}

impl SchedulingStrategy {
    pub const ALL: [SchedulingStrategy; 3] = [Self::FirstFit, Self::BestFit, Self::WorstFit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstFit => "first-fit",
            Self::BestFit => "best-fit",
            Self::WorstFit => "worst-fit",
        }
    }
}

impl std::fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown scheduling strategy '{0}' (expected first-fit, best-fit or worst-fit)")]
pub struct UnknownStrategy(pub String);

impl FromStr for SchedulingStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// Select a node for `cpu` under `strategy`.
///
/// `nodes` must be in stable order. Returns `None` when no Healthy node has
/// enough available capacity; that is a normal outcome, not an error.
pub fn select_node<'a, I>(strategy: SchedulingStrategy, cpu: f64, nodes: I) -> Option<NodeId>
where
    I: IntoIterator<Item = &'a Node>,
{
    let mut candidates = nodes.into_iter().filter(|n| n.fits(cpu));

    match strategy {
        SchedulingStrategy::FirstFit => candidates.next().map(|n| n.id),
        SchedulingStrategy::BestFit => candidates
            .fold(None::<&Node>, |best, n| match best {
                Some(b) if n.available() >= b.available() => Some(b),
                _ => Some(n),
            })
            .map(|n| n.id),
        SchedulingStrategy::WorstFit => candidates
            .fold(None::<&Node>, |best, n| match best {
                Some(b) if n.available() <= b.available() => Some(b),
                _ => Some(n),
            })
            .map(|n| n.id),
    }
}
