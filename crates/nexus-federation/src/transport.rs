//! Peer transport seam
//!
//! The wire protocol between controllers is an external collaborator; the
//! core only needs a handshake and a delta push. The in-memory transport
//! links controllers living in one process and is what the tests federate
//! over.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use nexus_state::{DeltaBatch, StateStore};
use nexus_types::{ControllerId, EventSource, NexusEvent, NexusEventEnvelope};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{FederationError, Result};

/// Answer to a successful handshake.
#[derive(Debug, Clone)]
pub struct PeerHello {
    /// The peer's controller identity.
    pub controller_id: ControllerId,
}

/// Transport between this controller and its peers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Open (or re-open) a session with the peer at `address`.
    async fn handshake(&self, address: &str) -> Result<PeerHello>;

    /// Ship a delta batch to the peer at `address`.
    async fn push_delta(&self, address: &str, batch: DeltaBatch) -> Result<()>;
}

/// Convert a delta batch into the envelopes the receiving store applies.
///
/// Each envelope carries the original write's timestamp and controller as
/// its own, which is exactly what the store's last-writer-wins resolution
/// keys on.
pub fn delta_envelopes(batch: &DeltaBatch) -> Vec<NexusEventEnvelope> {
    batch
        .records
        .iter()
        .map(|delta| {
            NexusEventEnvelope::at(
                NexusEvent::FederationDelta {
                    record: delta.record.clone(),
                },
                EventSource::Federation,
                delta.modified_by.clone(),
                delta.modified_at,
            )
        })
        .collect()
}

/// One reachable controller inside an [`InMemoryTransport`].
struct Endpoint {
    controller_id: ControllerId,
    store: Arc<StateStore>,
    events: broadcast::Sender<NexusEventEnvelope>,
}

/// Loopback transport connecting controllers in the same process.
///
/// Deltas are applied straight into the remote store through its normal
/// apply path and republished on the remote bus for its subscribers.
/// Endpoints can be taken down to exercise failure handling.
pub struct InMemoryTransport {
    endpoints: DashMap<String, Endpoint>,
    down: DashMap<String, ()>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
            down: DashMap::new(),
        }
    }

    /// Expose a controller at an address.
    pub fn register_endpoint(
        &self,
        address: impl Into<String>,
        controller_id: ControllerId,
        store: Arc<StateStore>,
        events: broadcast::Sender<NexusEventEnvelope>,
    ) {
        self.endpoints.insert(
            address.into(),
            Endpoint {
                controller_id,
                store,
                events,
            },
        );
    }

    /// Simulate a network partition towards one address.
    pub fn set_down(&self, address: &str, down: bool) {
        if down {
            self.down.insert(address.to_string(), ());
        } else {
            self.down.remove(address);
        }
    }

    fn check_up(&self, address: &str) -> Result<()> {
        if self.down.contains_key(address) {
            return Err(FederationError::Unreachable(format!(
                "{} is partitioned",
                address
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for InMemoryTransport {
    async fn handshake(&self, address: &str) -> Result<PeerHello> {
        self.check_up(address)?;
        let endpoint = self
            .endpoints
            .get(address)
            .ok_or_else(|| FederationError::Unreachable(format!("no endpoint at {}", address)))?;
        Ok(PeerHello {
            controller_id: endpoint.controller_id.clone(),
        })
    }

    async fn push_delta(&self, address: &str, batch: DeltaBatch) -> Result<()> {
        self.check_up(address)?;
        let endpoint = self
            .endpoints
            .get(address)
            .ok_or_else(|| FederationError::Unreachable(format!("no endpoint at {}", address)))?;

        debug!(
            address = address,
            records = batch.len(),
            origin = %batch.origin,
            "Delivering delta batch"
        );

        for envelope in delta_envelopes(&batch) {
            // Last-writer-wins inside apply; a losing delta is not an
            // error for the shipper.
            let _ = endpoint.store.apply(&envelope);
            let _ = endpoint.events.send(envelope);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_state::RecordDelta;
    use nexus_types::{NodeId, NodeRecord, ProviderKind};

    fn batch(origin: &str, records: Vec<RecordDelta>) -> DeltaBatch {
        DeltaBatch {
            origin: ControllerId::new(origin),
            high_seq: 1,
            records,
        }
    }

    #[tokio::test]
    async fn test_handshake_unknown_address() {
        let transport = InMemoryTransport::new();
        let err = transport.handshake("nowhere:7400").await.unwrap_err();
        assert!(matches!(err, FederationError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_push_applies_to_remote_store() {
        let transport = InMemoryTransport::new();
        let store = Arc::new(StateStore::new());
        let (events, _) = broadcast::channel(64);
        transport.register_endpoint(
            "b:7400",
            ControllerId::new("ctl-b"),
            store.clone(),
            events,
        );

        let mut record = NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "admin@host");
        record.version = 2;
        let delta = RecordDelta {
            record,
            modified_at: chrono::Utc::now(),
            modified_by: ControllerId::new("ctl-a"),
        };
        transport
            .push_delta("b:7400", batch("ctl-a", vec![delta]))
            .await
            .unwrap();

        assert_eq!(store.get(&NodeId::new("n1")).unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_partition() {
        let transport = InMemoryTransport::new();
        let store = Arc::new(StateStore::new());
        let (events, _) = broadcast::channel(64);
        transport.register_endpoint(
            "b:7400",
            ControllerId::new("ctl-b"),
            store,
            events,
        );

        transport.set_down("b:7400", true);
        assert!(transport.handshake("b:7400").await.is_err());

        transport.set_down("b:7400", false);
        assert!(transport.handshake("b:7400").await.is_ok());
    }
}
