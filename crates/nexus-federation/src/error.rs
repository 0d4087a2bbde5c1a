//! Federation error types.

use std::time::Duration;

use thiserror::Error;

/// Errors while talking to a peer controller.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Peer could not be reached.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// Handshake was answered but failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Peer rejected a delta batch.
    #[error("delta rejected by peer: {0}")]
    Rejected(String),

    /// Peer did not answer within the deadline.
    #[error("peer timed out after {after:?}")]
    Timeout { after: Duration },
}

/// Result type for federation operations.
pub type Result<T> = std::result::Result<T, FederationError>;
