//! Error types for the state store.

use nexus_types::{EventId, NodeId};
use thiserror::Error;

/// Errors that can occur while applying events or exporting state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The event's declared base version does not match the store. The
    /// caller must re-read and re-apply; duplicates of already-applied
    /// events surface here too.
    #[error("version conflict for {node_id}: event based on {expected}, store at {actual}")]
    Conflict {
        node_id: NodeId,
        expected: u64,
        actual: u64,
    },

    /// Node not found.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The event kind carries no state mutation.
    #[error("event {0} does not mutate state")]
    NotAStateEvent(EventId),

    /// The persistence backend failed. Fatal: surfaced through the facade
    /// as a process-health failure, never swallowed.
    #[error("snapshot storage error: {0}")]
    Storage(String),
}

impl StateError {
    /// Whether the caller should retry with a fresh read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::Conflict { .. })
    }
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
