//! Node records - the authoritative view of one managed target
//!
//! A NodeRecord is owned exclusively by the state store; every other
//! component sees clones. `version` is the optimistic-concurrency counter:
//! it increases by exactly one per accepted mutation, and a mutation based
//! on a stale version is rejected, never merged.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Kind of backend a node is managed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote host reached over SSH.
    Ssh,

    /// Docker engine, local or remote.
    Docker,

    /// Cloud API endpoint.
    Cloud,

    /// Operator-supplied adapter registered at runtime.
    Custom,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Ssh => write!(f, "ssh"),
            ProviderKind::Docker => write!(f, "docker"),
            ProviderKind::Cloud => write!(f, "cloud"),
            ProviderKind::Custom => write!(f, "custom"),
        }
    }
}

/// Last-observed health of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Discovered but never probed.
    Unknown,

    /// Last command or probe succeeded.
    Healthy,

    /// Recent provider faults, still reachable.
    Degraded,

    /// Circuit open or transport dead.
    Unreachable,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Unknown => write!(f, "unknown"),
            NodeStatus::Healthy => write!(f, "healthy"),
            NodeStatus::Degraded => write!(f, "degraded"),
            NodeStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// One managed target and its last-observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Stable operator-assigned identifier.
    pub id: NodeId,

    /// Which adapter family manages this node.
    pub provider: ProviderKind,

    /// Provider-specific address (`user@host`, `tcp://host:2375`, base URL).
    pub address: String,

    /// Command names this node supports.
    pub capabilities: BTreeSet<String>,

    /// Last-observed health.
    pub status: NodeStatus,

    /// When the node was last seen responding.
    pub last_seen: DateTime<Utc>,

    /// Mutation counter; increases by one per accepted apply.
    pub version: u64,
}

impl NodeRecord {
    /// Create a record for a newly discovered node.
    ///
    /// The version starts at zero; the state store assigns 1 when the
    /// discovery event is accepted.
    pub fn new(id: NodeId, provider: ProviderKind, address: impl Into<String>) -> Self {
        Self {
            id,
            provider,
            address: address.into(),
            capabilities: BTreeSet::new(),
            status: NodeStatus::Unknown,
            last_seen: Utc::now(),
            version: 0,
        }
    }

    /// Add supported capability names.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the node is currently considered usable.
    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Healthy
    }
}
