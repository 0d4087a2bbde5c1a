//! State store implementation
//!
//! Backed by a sharded concurrent map so two different nodes can be
//! mutated at the same time without contention; the per-entry lock is the
//! per-NodeRecord lock, there is no global one. Every accepted apply is
//! stamped with a store-wide sequence number that `diff_since` and
//! federation resume cursors are defined over; the per-record `version`
//! remains the optimistic-concurrency counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nexus_events::Subscription;
use nexus_types::{
    ControllerId, EventId, EventKind, NexusEvent, NexusEventEnvelope, NodeId, NodeRecord,
    NodeStatus,
};
use tracing::{debug, warn};

use crate::delta::RecordDelta;
use crate::error::{Result, StateError};

/// A record plus the bookkeeping the store keeps alongside it.
struct StoredRecord {
    record: NodeRecord,

    /// Store-wide sequence of the last accepted apply.
    seq: u64,

    /// Provenance of the last accepted write, for last-writer-wins.
    modified_at: DateTime<Utc>,
    modified_by: ControllerId,

    /// Event that produced the current state; repeated deliveries of the
    /// same event are rejected on this.
    last_event: EventId,
}

/// Authoritative, versioned store of known nodes.
pub struct StateStore {
    records: DashMap<NodeId, StoredRecord>,
    seq: AtomicU64,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Apply an event; the only mutation path.
    ///
    /// Returns the record as stored after the apply. A declared base
    /// version that no longer matches yields [`StateError::Conflict`];
    /// the caller re-reads and retries. Federated deltas resolve
    /// conflicts last-writer-wins on the envelope timestamp, ties broken
    /// in favor of the lexically greater origin controller ID.
    pub fn apply(&self, envelope: &NexusEventEnvelope) -> Result<NodeRecord> {
        match &envelope.event {
            NexusEvent::NodeDiscovered { record } => self.apply_discovery(envelope, record),
            NexusEvent::StatusChanged {
                node_id,
                status,
                base_version,
            } => {
                let status = *status;
                let when = envelope.timestamp;
                self.apply_versioned(envelope, node_id, *base_version, move |record| {
                    record.status = status;
                    record.last_seen = when;
                })
            }
            NexusEvent::CommandResult {
                node_id,
                base_version,
                ..
            } => {
                let when = envelope.timestamp;
                self.apply_versioned(envelope, node_id, *base_version, move |record| {
                    record.last_seen = when;
                })
            }
            NexusEvent::CircuitOpened { node_id, .. } => {
                self.apply_observation(envelope, node_id, NodeStatus::Unreachable)
            }
            NexusEvent::FederationDelta { record } => self.apply_federated(envelope, record),
            NexusEvent::CircuitClosed { .. } | NexusEvent::SubscriberOverflow { .. } => {
                Err(StateError::NotAStateEvent(envelope.id.clone()))
            }
        }
    }

    /// Get a node by ID.
    pub fn get(&self, id: &NodeId) -> Option<NodeRecord> {
        self.records.get(id).map(|stored| stored.record.clone())
    }

    /// All records, ordered by node ID.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Records changed after the given store sequence, ordered by node ID.
    pub fn diff_since(&self, seq: u64) -> Vec<RecordDelta> {
        let mut deltas: Vec<RecordDelta> = self
            .records
            .iter()
            .filter(|entry| entry.value().seq > seq)
            .map(|entry| {
                let stored = entry.value();
                RecordDelta {
                    record: stored.record.clone(),
                    modified_at: stored.modified_at,
                    modified_by: stored.modified_by.clone(),
                }
            })
            .collect();
        deltas.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        deltas
    }

    /// Highest store sequence assigned so far.
    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Remove a node (operator decommission). Returns the removed record.
    pub fn remove(&self, id: &NodeId) -> Option<NodeRecord> {
        self.records.remove(id).map(|(_, stored)| stored.record)
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the bus until it closes, applying every state-bearing
    /// event. Duplicate deliveries lose the version check and are dropped
    /// quietly; delivery is at-least-once, so that is the normal case,
    /// not an error.
    pub async fn run(self: Arc<Self>, mut subscription: Subscription) {
        while let Some(envelope) = subscription.recv().await {
            if !Self::is_state_event(envelope.kind()) {
                continue;
            }
            match self.apply(&envelope) {
                Ok(record) => {
                    debug!(
                        node_id = %record.id,
                        version = record.version,
                        "Applied event"
                    );
                }
                Err(StateError::Conflict { node_id, .. }) => {
                    debug!(
                        event_id = %envelope.id,
                        node_id = %node_id,
                        "Dropped duplicate or stale event"
                    );
                }
                Err(e) => {
                    warn!(event_id = %envelope.id, error = %e, "Failed to apply event");
                }
            }
        }
    }

    /// Event kinds the consumer loop applies.
    pub fn is_state_event(kind: EventKind) -> bool {
        matches!(
            kind,
            EventKind::NodeDiscovered
                | EventKind::StatusChanged
                | EventKind::CommandResult
                | EventKind::FederationDelta
                | EventKind::CircuitOpened
        )
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn apply_discovery(
        &self,
        envelope: &NexusEventEnvelope,
        incoming: &NodeRecord,
    ) -> Result<NodeRecord> {
        match self.records.entry(incoming.id.clone()) {
            Entry::Vacant(slot) => {
                // `last_seen` travels with the record so a disaster-recovery
                // replay does not fake freshness.
                let mut record = incoming.clone();
                record.version = record.version.max(1);
                let stored = slot.insert(StoredRecord {
                    record,
                    seq: self.next_seq(),
                    modified_at: envelope.timestamp,
                    modified_by: envelope.origin.clone(),
                    last_event: envelope.id.clone(),
                });
                Ok(stored.record.clone())
            }
            Entry::Occupied(mut slot) => {
                let stored = slot.get_mut();
                if stored.last_event == envelope.id {
                    return Err(StateError::Conflict {
                        node_id: incoming.id.clone(),
                        expected: stored.record.version,
                        actual: stored.record.version,
                    });
                }

                // Re-announce: discovery is authoritative for identity
                // metadata; observed status stays unless the announce
                // carries one. An announce that changes nothing is not a
                // mutation, so redelivered discoveries stay idempotent.
                let announces_status = incoming.status != NodeStatus::Unknown;
                let changed = stored.record.provider != incoming.provider
                    || stored.record.address != incoming.address
                    || stored.record.capabilities != incoming.capabilities
                    || (announces_status && stored.record.status != incoming.status);

                stored.last_event = envelope.id.clone();
                if !changed {
                    return Ok(stored.record.clone());
                }

                stored.record.provider = incoming.provider;
                stored.record.address = incoming.address.clone();
                stored.record.capabilities = incoming.capabilities.clone();
                if announces_status {
                    stored.record.status = incoming.status;
                }
                stored.record.last_seen = envelope.timestamp;
                stored.record.version += 1;
                stored.seq = self.next_seq();
                stored.modified_at = envelope.timestamp;
                stored.modified_by = envelope.origin.clone();
                Ok(stored.record.clone())
            }
        }
    }

    fn apply_versioned<F>(
        &self,
        envelope: &NexusEventEnvelope,
        node_id: &NodeId,
        base_version: u64,
        mutate: F,
    ) -> Result<NodeRecord>
    where
        F: FnOnce(&mut NodeRecord),
    {
        let mut stored = self
            .records
            .get_mut(node_id)
            .ok_or_else(|| StateError::NodeNotFound(node_id.clone()))?;

        if stored.last_event == envelope.id {
            return Err(StateError::Conflict {
                node_id: node_id.clone(),
                expected: base_version,
                actual: stored.record.version,
            });
        }
        if stored.record.version != base_version {
            return Err(StateError::Conflict {
                node_id: node_id.clone(),
                expected: base_version,
                actual: stored.record.version,
            });
        }

        mutate(&mut stored.record);
        stored.record.version += 1;
        stored.seq = self.next_seq();
        stored.modified_at = envelope.timestamp;
        stored.modified_by = envelope.origin.clone();
        stored.last_event = envelope.id.clone();
        Ok(stored.record.clone())
    }

    /// Status observations (circuit transitions) carry no base version:
    /// they are authoritative but only mutate when the status actually
    /// changes.
    fn apply_observation(
        &self,
        envelope: &NexusEventEnvelope,
        node_id: &NodeId,
        status: NodeStatus,
    ) -> Result<NodeRecord> {
        let mut stored = self
            .records
            .get_mut(node_id)
            .ok_or_else(|| StateError::NodeNotFound(node_id.clone()))?;

        if stored.last_event == envelope.id {
            return Err(StateError::Conflict {
                node_id: node_id.clone(),
                expected: stored.record.version,
                actual: stored.record.version,
            });
        }

        stored.last_event = envelope.id.clone();
        if stored.record.status == status {
            return Ok(stored.record.clone());
        }

        stored.record.status = status;
        stored.record.version += 1;
        stored.seq = self.next_seq();
        stored.modified_at = envelope.timestamp;
        stored.modified_by = envelope.origin.clone();
        Ok(stored.record.clone())
    }

    fn apply_federated(
        &self,
        envelope: &NexusEventEnvelope,
        incoming: &NodeRecord,
    ) -> Result<NodeRecord> {
        match self.records.entry(incoming.id.clone()) {
            Entry::Vacant(slot) => {
                let mut record = incoming.clone();
                record.version = record.version.max(1);
                let stored = slot.insert(StoredRecord {
                    record,
                    seq: self.next_seq(),
                    modified_at: envelope.timestamp,
                    modified_by: envelope.origin.clone(),
                    last_event: envelope.id.clone(),
                });
                Ok(stored.record.clone())
            }
            Entry::Occupied(mut slot) => {
                let stored = slot.get_mut();

                let incoming_wins = envelope.timestamp > stored.modified_at
                    || (envelope.timestamp == stored.modified_at
                        && envelope.origin > stored.modified_by);

                if incoming_wins {
                    let version = stored.record.version.max(incoming.version) + 1;
                    stored.record = incoming.clone();
                    stored.record.version = version;
                    stored.seq = self.next_seq();
                    stored.modified_at = envelope.timestamp;
                    stored.modified_by = envelope.origin.clone();
                    stored.last_event = envelope.id.clone();
                    Ok(stored.record.clone())
                } else {
                    // Local write is newer (or this is a repeat of the
                    // write we already hold): keep local, the merge is
                    // idempotent.
                    debug!(
                        node_id = %incoming.id,
                        incoming_at = %envelope.timestamp,
                        local_at = %stored.modified_at,
                        "Stale federated delta ignored"
                    );
                    Ok(stored.record.clone())
                }
            }
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_types::{EventSource, ProviderKind};

    fn origin_a() -> ControllerId {
        ControllerId::new("ctl-a")
    }

    fn discovery(id: &str) -> NexusEventEnvelope {
        NexusEventEnvelope::new(
            NexusEvent::NodeDiscovered {
                record: NodeRecord::new(NodeId::new(id), ProviderKind::Ssh, "admin@host")
                    .with_capabilities(["exec", "healthcheck"]),
            },
            EventSource::ControlPlane,
            origin_a(),
        )
    }

    fn status_change(id: &str, status: NodeStatus, base: u64) -> NexusEventEnvelope {
        NexusEventEnvelope::new(
            NexusEvent::StatusChanged {
                node_id: NodeId::new(id),
                status,
                base_version: base,
            },
            EventSource::ControlPlane,
            origin_a(),
        )
    }

    #[test]
    fn test_discovery_assigns_version_one() {
        let store = StateStore::new();
        let record = store.apply(&discovery("n1")).unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.status, NodeStatus::Unknown);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_version_counts_accepted_applies() {
        let store = StateStore::new();
        store.apply(&discovery("n1")).unwrap();

        let mut accepted = 1u64;
        for status in [
            NodeStatus::Healthy,
            NodeStatus::Degraded,
            NodeStatus::Healthy,
        ] {
            let record = store
                .apply(&status_change("n1", status, accepted))
                .unwrap();
            accepted += 1;
            assert_eq!(record.version, accepted);
        }
    }

    #[test]
    fn test_stale_base_version_conflicts() {
        let store = StateStore::new();
        store.apply(&discovery("n1")).unwrap();
        store
            .apply(&status_change("n1", NodeStatus::Healthy, 1))
            .unwrap();

        // A writer still working from version 1 is rejected.
        let err = store
            .apply(&status_change("n1", NodeStatus::Degraded, 1))
            .unwrap_err();
        match err {
            StateError::Conflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        // State is untouched.
        let record = store.get(&NodeId::new("n1")).unwrap();
        assert_eq!(record.status, NodeStatus::Healthy);
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_duplicate_event_rejected_after_first_apply() {
        let store = StateStore::new();
        store.apply(&discovery("n1")).unwrap();

        let envelope = status_change("n1", NodeStatus::Healthy, 1);
        store.apply(&envelope).unwrap();

        // Same event delivered again (at-least-once): rejected, state
        // unchanged.
        assert!(store.apply(&envelope).unwrap_err().is_conflict());
        assert_eq!(store.get(&NodeId::new("n1")).unwrap().version, 2);
    }

    #[test]
    fn test_unknown_node_rejected() {
        let store = StateStore::new();
        let err = store
            .apply(&status_change("ghost", NodeStatus::Healthy, 1))
            .unwrap_err();
        assert!(matches!(err, StateError::NodeNotFound(_)));
    }

    #[test]
    fn test_snapshot_ordered_by_id() {
        let store = StateStore::new();
        for id in ["n3", "n1", "n2"] {
            store.apply(&discovery(id)).unwrap();
        }

        let ids: Vec<String> = store
            .snapshot()
            .into_iter()
            .map(|r| r.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn test_diff_since_roundtrip() {
        let store = StateStore::new();
        for id in ["n2", "n1", "n3"] {
            store.apply(&discovery(id)).unwrap();
        }
        store
            .apply(&status_change("n2", NodeStatus::Healthy, 1))
            .unwrap();

        let diff = store.diff_since(0);
        assert_eq!(diff.len(), 3);

        // Rebuild a fresh store from the diff; its own full diff must be
        // identical in order and content.
        let rebuilt = StateStore::new();
        for delta in &diff {
            let envelope = NexusEventEnvelope::at(
                NexusEvent::FederationDelta {
                    record: delta.record.clone(),
                },
                EventSource::Federation,
                delta.modified_by.clone(),
                delta.modified_at,
            );
            rebuilt.apply(&envelope).unwrap();
        }

        let rebuilt_diff = rebuilt.diff_since(0);
        let original: Vec<_> = diff.iter().map(|d| &d.record).collect();
        let recovered: Vec<_> = rebuilt_diff.iter().map(|d| &d.record).collect();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_diff_since_skips_unchanged() {
        let store = StateStore::new();
        store.apply(&discovery("n1")).unwrap();
        let cut = store.current_seq();
        store.apply(&discovery("n2")).unwrap();

        let diff = store.diff_since(cut);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].record.id, NodeId::new("n2"));
    }

    #[test]
    fn test_federated_last_writer_wins() {
        let store = StateStore::new();
        store.apply(&discovery("n1")).unwrap();
        store
            .apply(&status_change("n1", NodeStatus::Healthy, 1))
            .unwrap();

        let older = Utc::now() - chrono::Duration::seconds(600);
        let mut stale = NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "admin@elsewhere");
        stale.version = 5;

        // A delta older than the local write loses.
        let envelope = NexusEventEnvelope::at(
            NexusEvent::FederationDelta { record: stale },
            EventSource::Federation,
            ControllerId::new("ctl-b"),
            older,
        );
        let kept = store.apply(&envelope).unwrap();
        assert_eq!(kept.address, "admin@host");

        // A newer delta wins and bumps the version past both sides.
        let newer = Utc::now() + chrono::Duration::seconds(5);
        let mut fresh = NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "admin@new-home");
        fresh.version = 4;
        let envelope = NexusEventEnvelope::at(
            NexusEvent::FederationDelta { record: fresh },
            EventSource::Federation,
            ControllerId::new("ctl-b"),
            newer,
        );
        let merged = store.apply(&envelope).unwrap();
        assert_eq!(merged.address, "admin@new-home");
        assert!(merged.version > 2);
    }

    #[test]
    fn test_federated_tie_breaks_on_origin() {
        let t = Utc::now();

        let store = StateStore::new();
        let mut from_a = NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "from-a");
        from_a.version = 4;
        store
            .apply(&NexusEventEnvelope::at(
                NexusEvent::FederationDelta { record: from_a },
                EventSource::Federation,
                ControllerId::new("ctl-a"),
                t,
            ))
            .unwrap();

        // Same timestamp, lexically greater origin: wins.
        let mut from_b = NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "from-b");
        from_b.version = 4;
        let merged = store
            .apply(&NexusEventEnvelope::at(
                NexusEvent::FederationDelta { record: from_b },
                EventSource::Federation,
                ControllerId::new("ctl-b"),
                t,
            ))
            .unwrap();
        assert_eq!(merged.address, "from-b");

        // Same timestamp, lexically smaller origin: loses.
        let mut from_0 = NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "from-0");
        from_0.version = 9;
        let kept = store
            .apply(&NexusEventEnvelope::at(
                NexusEvent::FederationDelta { record: from_0 },
                EventSource::Federation,
                ControllerId::new("ctl-0"),
                t,
            ))
            .unwrap();
        assert_eq!(kept.address, "from-b");
    }

    #[test]
    fn test_circuit_open_marks_unreachable() {
        let store = StateStore::new();
        store.apply(&discovery("n1")).unwrap();

        let envelope = NexusEventEnvelope::new(
            NexusEvent::CircuitOpened {
                node_id: NodeId::new("n1"),
                retry_at: Utc::now(),
            },
            EventSource::Breaker,
            origin_a(),
        );
        let record = store.apply(&envelope).unwrap();
        assert_eq!(record.status, NodeStatus::Unreachable);
        assert_eq!(record.version, 2);

        // A second open observation while already unreachable is not a
        // mutation.
        let envelope = NexusEventEnvelope::new(
            NexusEvent::CircuitOpened {
                node_id: NodeId::new("n1"),
                retry_at: Utc::now(),
            },
            EventSource::Breaker,
            origin_a(),
        );
        let record = store.apply(&envelope).unwrap();
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_non_state_event_rejected() {
        let store = StateStore::new();
        let envelope = NexusEventEnvelope::new(
            NexusEvent::SubscriberOverflow {
                subscriber: "x".into(),
                dropped: 1,
            },
            EventSource::Bus,
            origin_a(),
        );
        assert!(matches!(
            store.apply(&envelope),
            Err(StateError::NotAStateEvent(_))
        ));
    }

    #[test]
    fn test_remove() {
        let store = StateStore::new();
        store.apply(&discovery("n1")).unwrap();
        assert!(store.remove(&NodeId::new("n1")).is_some());
        assert!(store.get(&NodeId::new("n1")).is_none());
        assert!(store.remove(&NodeId::new("n1")).is_none());
    }

    #[tokio::test]
    async fn test_consumer_loop_applies_bus_events() {
        use nexus_events::EventBus;

        let bus = EventBus::new(origin_a());
        let store = Arc::new(StateStore::new());
        let handle = tokio::spawn(store.clone().run(bus.subscribe_all("state-store")));

        bus.publish(discovery("n1"));

        // Wait for the consumer to catch up.
        for _ in 0..50 {
            if store.get(&NodeId::new("n1")).is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.get(&NodeId::new("n1")).unwrap().version, 1);

        handle.abort();
    }
}
