//! Error types for the control plane

use chrono::{DateTime, Utc};
use nexus_federation::FederationError;
use nexus_provider::{ProviderError, RegistryError};
use nexus_state::StateError;
use nexus_types::NodeId;
use thiserror::Error;

/// Control plane error type
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Resolution or capability mistake; never retried automatically.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// State subsystem error; conflicts are retried internally, storage
    /// failures surface here as process-health failures.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Federation subsystem error.
    #[error("federation error: {0}")]
    Federation(#[from] FederationError),

    /// The node's circuit is open: the provider was deliberately not
    /// tried. Distinct from a provider fault.
    #[error("circuit open for {node_id}, retry at {retry_at}")]
    CircuitOpen {
        node_id: NodeId,
        retry_at: DateTime<Utc>,
    },

    /// The provider was tried and failed; the fault was counted by the
    /// node's breaker.
    #[error("provider fault on {node_id}: {source}")]
    Provider {
        node_id: NodeId,
        #[source]
        source: ProviderError,
    },

    /// Invalid request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for control plane operations
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

impl ControlPlaneError {
    /// Create a not-found error for a node.
    pub fn node_not_found(node_id: &NodeId) -> Self {
        Self::State(StateError::NodeNotFound(node_id.clone()))
    }

    /// Whether the command was short-circuited rather than failed.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
