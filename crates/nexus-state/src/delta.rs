//! Delta export format for federation sync.

use chrono::{DateTime, Utc};
use nexus_types::{ControllerId, NodeRecord};
use serde::{Deserialize, Serialize};

/// One changed record plus the provenance of its last accepted write,
/// which drives last-writer-wins resolution on the receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDelta {
    /// The record as currently stored.
    pub record: NodeRecord,

    /// When the winning write happened.
    pub modified_at: DateTime<Utc>,

    /// Which controller made the winning write.
    pub modified_by: ControllerId,
}

/// An ordered batch of changed records shipped to one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaBatch {
    /// Controller shipping the batch.
    pub origin: ControllerId,

    /// Store sequence the batch was cut at; the receiver resumes from
    /// here on the next sync.
    pub high_seq: u64,

    /// Changed records in `id` order for deterministic, resumable
    /// streaming.
    pub records: Vec<RecordDelta>,
}

impl DeltaBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
