//! Federation sync loop
//!
//! Runs on its own timer, independent of command traffic: a stalled peer
//! can never block local command processing. Each round handshakes
//! disconnected peers and ships `diff_since(last_sync_seq)` to synced
//! ones; strikes accumulate per peer and eventually evict it.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use nexus_state::{DeltaBatch, StateStore};
use nexus_types::{ControllerId, NexusEventEnvelope};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::FederationConfig;
use crate::error::FederationError;
use crate::peer::{FederationPeer, PeerStatus};
use crate::transport::{delta_envelopes, PeerTransport};

/// Periodic state exchange with peer controllers.
pub struct FederationSync {
    config: FederationConfig,
    store: Arc<StateStore>,
    transport: Arc<dyn PeerTransport>,
    peers: DashMap<String, FederationPeer>,
    events: broadcast::Sender<NexusEventEnvelope>,
    origin: ControllerId,
    running: Arc<RwLock<bool>>,
    sync_tx: mpsc::Sender<()>,
}

impl FederationSync {
    /// Create the sync component; the returned receiver feeds manual
    /// sync triggers into [`FederationSync::start`].
    pub fn new(
        config: FederationConfig,
        store: Arc<StateStore>,
        transport: Arc<dyn PeerTransport>,
        events: broadcast::Sender<NexusEventEnvelope>,
        origin: ControllerId,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (sync_tx, sync_rx) = mpsc::channel(10);

        let sync = Arc::new(Self {
            config,
            store,
            transport,
            peers: DashMap::new(),
            events,
            origin,
            running: Arc::new(RwLock::new(false)),
            sync_tx,
        });

        (sync, sync_rx)
    }

    /// This controller's identity.
    pub fn origin(&self) -> &ControllerId {
        &self.origin
    }

    /// Configure a peer by address. Its controller identity is learned at
    /// the first successful handshake.
    pub fn add_peer(&self, address: impl Into<String>) {
        let address = address.into();
        if !self.peers.contains_key(&address) {
            info!(address = %address, "Peer configured");
            self.peers.insert(address.clone(), FederationPeer::new(address));
        }
    }

    /// Drop a peer.
    pub fn remove_peer(&self, address: &str) -> bool {
        self.peers.remove(address).is_some()
    }

    /// Current view of all peers.
    pub fn peers(&self) -> Vec<FederationPeer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Ask the running loop for an immediate round.
    pub async fn trigger_sync(&self) {
        let _ = self.sync_tx.send(()).await;
    }

    /// Run the sync loop until stopped.
    pub async fn start(self: Arc<Self>, mut sync_rx: mpsc::Receiver<()>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        info!(origin = %self.origin, "Federation sync started");

        let mut ticker = interval(self.config.sync_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sync_now().await;
                }
                Some(_) = sync_rx.recv() => {
                    self.sync_now().await;
                }
                else => break,
            }

            let running = self.running.read().await;
            if !*running {
                break;
            }
        }

        info!(origin = %self.origin, "Federation sync stopped");
    }

    /// Stop the loop after the current round.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        let _ = self.sync_tx.try_send(());
    }

    /// Run one sync round over every peer.
    pub async fn sync_now(&self) {
        let addresses: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        for address in addresses {
            self.sync_peer(&address).await;
        }
    }

    /// Apply a batch received from a peer through the normal event path.
    ///
    /// Every record becomes a `FederationDelta` envelope stamped with the
    /// original write's time and controller, so the store's last-writer-
    /// wins resolution governs it like any other mutation.
    pub fn apply_remote(&self, batch: &DeltaBatch) {
        debug!(
            origin = %batch.origin,
            records = batch.len(),
            "Applying remote delta batch"
        );
        for envelope in delta_envelopes(batch) {
            if let Err(e) = self.store.apply(&envelope) {
                debug!(event_id = %envelope.id, error = %e, "Remote delta not applied");
            }
            let _ = self.events.send(envelope);
        }
    }

    async fn sync_peer(&self, address: &str) {
        let status = match self.peers.get(address) {
            Some(peer) => peer.status,
            None => return,
        };

        match status {
            PeerStatus::Disconnected => self.handshake_peer(address).await,
            PeerStatus::Synced => self.push_to_peer(address).await,
            // A handshake from a previous round is still in flight.
            PeerStatus::Handshaking => {}
        }
    }

    async fn handshake_peer(&self, address: &str) {
        if let Some(mut peer) = self.peers.get_mut(address) {
            peer.status = PeerStatus::Handshaking;
        } else {
            return;
        }

        let result = match tokio::time::timeout(
            self.config.handshake_timeout,
            self.transport.handshake(address),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FederationError::Timeout {
                after: self.config.handshake_timeout,
            }),
        };

        match result {
            Ok(hello) => {
                if let Some(mut peer) = self.peers.get_mut(address) {
                    info!(
                        address = address,
                        controller_id = %hello.controller_id,
                        "Peer handshake succeeded"
                    );
                    peer.controller_id = Some(hello.controller_id);
                    peer.status = PeerStatus::Synced;
                    peer.consecutive_failures = 0;
                    peer.last_seen = Some(Utc::now());
                }
                // Catch the fresh peer up in the same round.
                self.push_to_peer(address).await;
            }
            Err(e) => {
                warn!(address = address, error = %e, "Peer handshake failed");
                self.record_failure(address);
            }
        }
    }

    async fn push_to_peer(&self, address: &str) {
        let since = match self.peers.get(address) {
            Some(peer) if peer.status == PeerStatus::Synced => peer.last_sync_seq,
            _ => return,
        };

        // Cut the sequence before reading the diff: anything applied
        // concurrently is re-shipped next round, which the receiver's
        // idempotent merge absorbs.
        let high_seq = self.store.current_seq();
        let records = self.store.diff_since(since);

        if records.is_empty() {
            if let Some(mut peer) = self.peers.get_mut(address) {
                peer.last_seen = Some(Utc::now());
            }
            return;
        }

        let batch = DeltaBatch {
            origin: self.origin.clone(),
            high_seq,
            records,
        };
        let count = batch.len();

        let result = match tokio::time::timeout(
            self.config.push_timeout,
            self.transport.push_delta(address, batch),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FederationError::Timeout {
                after: self.config.push_timeout,
            }),
        };

        match result {
            Ok(()) => {
                if let Some(mut peer) = self.peers.get_mut(address) {
                    peer.last_sync_seq = high_seq;
                    peer.consecutive_failures = 0;
                    peer.last_seen = Some(Utc::now());
                }
                debug!(address = address, records = count, high_seq = high_seq, "Delta shipped");
            }
            Err(e) => {
                warn!(address = address, error = %e, "Delta push failed");
                self.record_failure(address);
            }
        }
    }

    /// Count a strike; enough of them disconnect, more evict.
    fn record_failure(&self, address: &str) {
        let evict = {
            let mut peer = match self.peers.get_mut(address) {
                Some(peer) => peer,
                None => return,
            };
            peer.consecutive_failures += 1;

            if peer.consecutive_failures >= self.config.eviction_threshold {
                true
            } else {
                if peer.consecutive_failures >= self.config.failure_threshold
                    || peer.status == PeerStatus::Handshaking
                {
                    peer.status = PeerStatus::Disconnected;
                }
                false
            }
        };

        if evict {
            warn!(address = address, "Peer evicted after repeated failures");
            self.peers.remove(address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use nexus_types::{EventSource, NexusEvent, NodeId, NodeRecord, NodeStatus, ProviderKind};

    fn test_config() -> FederationConfig {
        FederationConfig {
            sync_interval: std::time::Duration::from_millis(50),
            failure_threshold: 3,
            eviction_threshold: 5,
            handshake_timeout: std::time::Duration::from_millis(200),
            push_timeout: std::time::Duration::from_millis(200),
        }
    }

    struct Controller {
        id: ControllerId,
        store: Arc<StateStore>,
        sync: Arc<FederationSync>,
    }

    fn controller(
        name: &str,
        address: &str,
        transport: &Arc<InMemoryTransport>,
    ) -> Controller {
        let id = ControllerId::new(name);
        let store = Arc::new(StateStore::new());
        let (events, _) = broadcast::channel(256);
        transport.register_endpoint(address, id.clone(), store.clone(), events.clone());
        let peer_transport: Arc<dyn PeerTransport> = transport.clone();
        let (sync, _rx) = FederationSync::new(
            test_config(),
            store.clone(),
            peer_transport,
            events,
            id.clone(),
        );
        Controller { id, store, sync }
    }

    fn discover(ctl: &Controller, node: &str, status: NodeStatus) {
        let envelope = NexusEventEnvelope::new(
            NexusEvent::NodeDiscovered {
                record: NodeRecord::new(NodeId::new(node), ProviderKind::Ssh, "admin@host")
                    .with_status(status),
            },
            EventSource::ControlPlane,
            ctl.id.clone(),
        );
        ctl.store.apply(&envelope).unwrap();
    }

    #[tokio::test]
    async fn test_handshake_then_delta_flow() {
        let transport = Arc::new(InMemoryTransport::new());
        let a = controller("ctl-a", "a:7400", &transport);
        let b = controller("ctl-b", "b:7400", &transport);

        discover(&a, "n1", NodeStatus::Healthy);
        discover(&a, "n2", NodeStatus::Unknown);

        a.sync.add_peer("b:7400");
        a.sync.sync_now().await;

        // Handshake and first push happen in the same round.
        let peers = a.sync.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].status, PeerStatus::Synced);
        assert_eq!(
            peers[0].controller_id.as_ref().unwrap(),
            &ControllerId::new("ctl-b")
        );
        assert_eq!(b.store.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_cursor_advances() {
        let transport = Arc::new(InMemoryTransport::new());
        let a = controller("ctl-a", "a:7400", &transport);
        let b = controller("ctl-b", "b:7400", &transport);

        discover(&a, "n1", NodeStatus::Healthy);
        a.sync.add_peer("b:7400");
        a.sync.sync_now().await;

        let cursor = a.sync.peers()[0].last_sync_seq;
        assert!(cursor > 0);

        // Nothing new: cursor stays put.
        a.sync.sync_now().await;
        assert_eq!(a.sync.peers()[0].last_sync_seq, cursor);

        // A new node moves it.
        discover(&a, "n2", NodeStatus::Healthy);
        a.sync.sync_now().await;
        assert!(a.sync.peers()[0].last_sync_seq > cursor);
        assert_eq!(b.store.len(), 2);
    }

    #[tokio::test]
    async fn test_synced_peer_disconnects_after_three_failures() {
        let transport = Arc::new(InMemoryTransport::new());
        let a = controller("ctl-a", "a:7400", &transport);
        let _b = controller("ctl-b", "b:7400", &transport);

        a.sync.add_peer("b:7400");
        a.sync.sync_now().await;
        assert_eq!(a.sync.peers()[0].status, PeerStatus::Synced);

        transport.set_down("b:7400", true);
        discover(&a, "n1", NodeStatus::Healthy);

        for _ in 0..2 {
            a.sync.sync_now().await;
            assert_eq!(a.sync.peers()[0].status, PeerStatus::Synced);
        }
        a.sync.sync_now().await;
        assert_eq!(a.sync.peers()[0].status, PeerStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_peer_eventually_evicted() {
        let transport = Arc::new(InMemoryTransport::new());
        let a = controller("ctl-a", "a:7400", &transport);

        a.sync.add_peer("nowhere:7400");
        for _ in 0..5 {
            a.sync.sync_now().await;
        }
        assert!(a.sync.peers().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writes_converge_on_newest() {
        let transport = Arc::new(InMemoryTransport::new());
        let a = controller("ctl-a", "a:7400", &transport);
        let b = controller("ctl-b", "b:7400", &transport);

        // Both controllers hold n1 at the same version, mutated at t1 < t2.
        let t1 = Utc::now() - chrono::Duration::seconds(10);
        let t2 = Utc::now() - chrono::Duration::seconds(5);

        let mut from_a = NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "seen-by-a");
        from_a.version = 4;
        a.store
            .apply(&NexusEventEnvelope::at(
                NexusEvent::FederationDelta { record: from_a },
                EventSource::Federation,
                a.id.clone(),
                t1,
            ))
            .unwrap();

        let mut from_b = NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "seen-by-b");
        from_b.version = 4;
        b.store
            .apply(&NexusEventEnvelope::at(
                NexusEvent::FederationDelta { record: from_b },
                EventSource::Federation,
                b.id.clone(),
                t2,
            ))
            .unwrap();

        a.sync.add_peer("b:7400");
        b.sync.add_peer("a:7400");
        a.sync.sync_now().await;
        b.sync.sync_now().await;

        // Both sides converge on the later write.
        assert_eq!(a.store.get(&NodeId::new("n1")).unwrap().address, "seen-by-b");
        assert_eq!(b.store.get(&NodeId::new("n1")).unwrap().address, "seen-by-b");
    }

    #[tokio::test]
    async fn test_remove_peer() {
        let transport = Arc::new(InMemoryTransport::new());
        let a = controller("ctl-a", "a:7400", &transport);

        a.sync.add_peer("b:7400");
        assert!(a.sync.remove_peer("b:7400"));
        assert!(!a.sync.remove_peer("b:7400"));
        assert!(a.sync.peers().is_empty());
    }
}
