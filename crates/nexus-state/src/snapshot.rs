//! Snapshot persistence seam for disaster recovery
//!
//! The disaster-recovery collaborator periodically persists
//! `StateStore::snapshot()` output and, on restore, replays it through the
//! normal apply path as synthetic discovery events. The store itself stays
//! in memory; this trait is the only persistence boundary, and a failing
//! backend is surfaced as [`crate::StateError::Storage`] - the one fatal
//! condition.

use async_trait::async_trait;
use nexus_types::NodeRecord;
use tokio::sync::RwLock;

use crate::error::Result;

/// Durable storage for full state snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a full snapshot, replacing any previous one.
    async fn persist(&self, records: &[NodeRecord]) -> Result<()>;

    /// Load the most recent snapshot, if any.
    async fn load(&self) -> Result<Option<Vec<NodeRecord>>>;
}

/// In-memory snapshot storage for development and testing.
pub struct InMemorySnapshotStore {
    inner: RwLock<Option<Vec<NodeRecord>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn persist(&self, records: &[NodeRecord]) -> Result<()> {
        *self.inner.write().await = Some(records.to_vec());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<NodeRecord>>> {
        Ok(self.inner.read().await.clone())
    }
}
