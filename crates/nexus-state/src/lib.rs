//! Nexus State - the authoritative, versioned record of the fleet
//!
//! The state store exclusively owns every [`nexus_types::NodeRecord`] and is
//! the only component permitted to mutate them, always in response to
//! consumed events. Mutations are optimistic: an event that declares a stale
//! base version is rejected with a conflict, never merged. Federated deltas
//! go through the same apply path with documented last-writer-wins
//! resolution.

#![deny(unsafe_code)]

pub mod delta;
pub mod error;
pub mod snapshot;
pub mod store;

pub use delta::{DeltaBatch, RecordDelta};
pub use error::{Result, StateError};
pub use snapshot::{InMemorySnapshotStore, SnapshotStore};
pub use store::StateStore;
