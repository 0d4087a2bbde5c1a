//! Provider and registry error types
//!
//! The two families are deliberately distinct: a [`ProviderError`] is a
//! transport or remote fault and is counted by the circuit breaker; a
//! [`RegistryError`] is a caller or configuration mistake and never is.

use std::time::Duration;

use nexus_types::{NodeId, ProviderKind};
use thiserror::Error;

/// Transport or remote fault while talking to a backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Could not reach the backend at all.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The backend was reached but the operation failed there.
    #[error("remote fault: {message}")]
    Remote {
        message: String,
        exit_code: Option<i32>,
    },

    /// The adapter's own deadline elapsed.
    #[error("provider deadline exceeded after {after:?}")]
    Timeout { after: Duration },

    /// The backend answered with something the adapter cannot interpret.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Caller or configuration mistake during resolution.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Node is not present in the state store.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// No adapter factory registered for the node's provider kind.
    #[error("no adapter registered for provider {kind} (node {node_id})")]
    UnsupportedProvider {
        node_id: NodeId,
        kind: ProviderKind,
    },

    /// Valid adapter, but it does not expose the named capability.
    #[error("node {node_id} does not support capability {capability}")]
    UnsupportedCapability {
        node_id: NodeId,
        capability: String,
    },

    /// A factory for this provider kind already exists.
    #[error("adapter factory already registered for provider {0}")]
    DuplicateFactory(ProviderKind),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
