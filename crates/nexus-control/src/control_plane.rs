//! Main ControlPlane implementation
//!
//! The ControlPlane is the unified entry point for all controller
//! operations. It composes the subsystems (bus, store, registry,
//! federation) behind one API: a command resolves to an adapter, runs
//! gated by that node's circuit breaker inside a bounded worker pool, and
//! its outcome is published on the bus and applied to the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use nexus_breaker::{BreakerError, BreakerStats};
use nexus_events::{EventBus, EventFilter, Subscription};
use nexus_federation::{FederationPeer, FederationSync};
use nexus_provider::{PluginRegistry, ProviderError, RegistryError};
use nexus_state::{SnapshotStore, StateStore};
use nexus_types::{
    Capability, ControllerId, EventSource, NexusEvent, NexusEventEnvelope, NodeId, NodeRecord,
    NodeStatus,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::context::RequestContext;
use crate::error::{ControlPlaneError, Result};

/// Facade-level configuration.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Size of the worker pool shared across provider invocations.
    pub max_inflight_invocations: usize,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            max_inflight_invocations: 32,
        }
    }
}

/// Result of one executed command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Node the command ran against.
    pub node_id: NodeId,
    /// Capability that was invoked.
    pub capability: String,
    /// Provider output payload.
    pub output: Value,
    /// When the invocation finished.
    pub completed_at: DateTime<Utc>,
}

/// Unified control plane for one controller instance.
pub struct ControlPlane {
    /// This controller's identity.
    controller_id: ControllerId,

    /// Event bus shared by every subsystem.
    bus: EventBus,

    /// Authoritative fleet state.
    store: Arc<StateStore>,

    /// Adapter factories and per-node breakers.
    registry: Arc<PluginRegistry>,

    /// Peer sync.
    federation: Arc<FederationSync>,

    /// Trigger receiver handed to the federation loop at start.
    federation_rx: Mutex<Option<mpsc::Receiver<()>>>,

    /// Optional snapshot persistence for disaster recovery.
    snapshot_store: Option<Arc<dyn SnapshotStore>>,

    /// Worker pool bound shared across provider invocations.
    invocation_permits: Arc<Semaphore>,

    /// Background task handles.
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,

    /// Whether background loops have been spawned.
    started: AtomicBool,
}

impl ControlPlane {
    /// Assemble a control plane from already-built subsystems. Most
    /// callers go through [`crate::ControlPlaneBuilder`].
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        controller_id: ControllerId,
        bus: EventBus,
        store: Arc<StateStore>,
        registry: Arc<PluginRegistry>,
        federation: Arc<FederationSync>,
        federation_rx: mpsc::Receiver<()>,
        snapshot_store: Option<Arc<dyn SnapshotStore>>,
        config: ControlPlaneConfig,
    ) -> Self {
        Self {
            controller_id,
            bus,
            store,
            registry,
            federation,
            federation_rx: Mutex::new(Some(federation_rx)),
            snapshot_store,
            invocation_permits: Arc::new(Semaphore::new(config.max_inflight_invocations)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// This controller's identity.
    pub fn controller_id(&self) -> &ControllerId {
        &self.controller_id
    }

    /// The state store, for composition with external collaborators.
    pub fn state_store(&self) -> Arc<StateStore> {
        self.store.clone()
    }

    /// A raw event sender, for wiring transports and loopbacks.
    pub fn event_sender(&self) -> broadcast::Sender<NexusEventEnvelope> {
        self.bus.sender()
    }

    // ========== Lifecycle ==========

    /// Spawn the background loops: the store's bus consumer and the
    /// federation timer.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let consumer = self
            .store
            .clone()
            .run(self.bus.subscribe_all("state-store"));
        let store_task = tokio::spawn(consumer);

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(store_task);

        if let Some(rx) = self.federation_rx.lock().unwrap().take() {
            tasks.push(tokio::spawn(self.federation.clone().start(rx)));
        }

        info!(controller_id = %self.controller_id, "Control plane started");
    }

    /// Stop background loops.
    pub async fn shutdown(&self) {
        self.federation.stop().await;
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        info!(controller_id = %self.controller_id, "Control plane stopped");
    }

    // ========== Node Operations ==========

    /// Announce a node to the fleet (or re-announce it with fresh
    /// metadata).
    #[instrument(skip(self, record, ctx), fields(node_id = %record.id))]
    pub async fn discover_node(
        &self,
        record: NodeRecord,
        ctx: &RequestContext,
    ) -> Result<NodeRecord> {
        let node_id = record.id.clone();
        let envelope = self.envelope(
            NexusEvent::NodeDiscovered { record },
            EventSource::ControlPlane,
            ctx,
        );

        let stored = self.store.apply(&envelope)?;
        self.registry.evict(&node_id);
        self.bus.publish(envelope);

        info!(node_id = %node_id, version = stored.version, "Node discovered");
        Ok(stored)
    }

    /// Remove a node from the fleet.
    #[instrument(skip(self, _ctx), fields(node_id = %node_id))]
    pub async fn decommission_node(
        &self,
        node_id: &NodeId,
        _ctx: &RequestContext,
    ) -> Result<NodeRecord> {
        let removed = self
            .store
            .remove(node_id)
            .ok_or_else(|| ControlPlaneError::node_not_found(node_id))?;
        self.registry.remove_node(node_id);

        info!(node_id = %node_id, "Node decommissioned");
        Ok(removed)
    }

    /// Get one node.
    pub fn node(&self, node_id: &NodeId) -> Option<NodeRecord> {
        self.store.get(node_id)
    }

    /// All known nodes, ordered by ID.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.store.snapshot()
    }

    /// Capabilities a node's adapter exposes.
    pub fn list_capabilities(&self, node_id: &NodeId) -> Result<Vec<Capability>> {
        Ok(self.registry.list_capabilities(node_id)?)
    }

    /// Circuit breaker statistics for a node, if it has been resolved.
    pub fn breaker_stats(&self, node_id: &NodeId) -> Option<BreakerStats> {
        self.registry.breaker_stats(node_id)
    }

    // ========== Command Path ==========

    /// Execute a capability against a node.
    ///
    /// Resolution and capability screening fail without touching the
    /// breaker; the invocation itself runs on the shared worker pool,
    /// gated by the node's breaker and the provider deadline. The outcome
    /// is published as a `CommandResult` and the induced status change is
    /// applied to the store.
    #[instrument(skip(self, args, ctx), fields(node_id = %node_id, capability = capability))]
    pub async fn execute(
        &self,
        node_id: &NodeId,
        capability: &str,
        args: Value,
        ctx: &RequestContext,
    ) -> Result<CommandOutcome> {
        let guarded = self.registry.resolve(node_id)?;

        if !guarded.adapter().supports(capability) {
            return Err(ControlPlaneError::Registry(
                RegistryError::UnsupportedCapability {
                    node_id: node_id.clone(),
                    capability: capability.to_string(),
                },
            ));
        }

        let _permit = self
            .invocation_permits
            .acquire()
            .await
            .map_err(|_| ControlPlaneError::Internal("invocation pool closed".into()))?;

        match guarded.invoke(capability, &args).await {
            Ok(output) => {
                self.publish_command_result(node_id, capability, true, output.clone(), ctx);
                self.observe_status(node_id, NodeStatus::Healthy, ctx);

                info!(node_id = %node_id, capability = capability, "Command succeeded");
                Ok(CommandOutcome {
                    node_id: node_id.clone(),
                    capability: capability.to_string(),
                    output,
                    completed_at: Utc::now(),
                })
            }
            Err(BreakerError::Open { node_id, retry_at }) => {
                debug!(node_id = %node_id, retry_at = %retry_at, "Command short-circuited");
                Err(ControlPlaneError::CircuitOpen { node_id, retry_at })
            }
            Err(BreakerError::Timeout { after }) => {
                let source = ProviderError::Timeout { after };
                self.record_fault(node_id, capability, &source, ctx);
                Err(ControlPlaneError::Provider {
                    node_id: node_id.clone(),
                    source,
                })
            }
            Err(BreakerError::Inner(source)) => {
                self.record_fault(node_id, capability, &source, ctx);
                Err(ControlPlaneError::Provider {
                    node_id: node_id.clone(),
                    source,
                })
            }
        }
    }

    // ========== Federation ==========

    /// Configure a peer controller by address.
    pub fn add_peer(&self, address: impl Into<String>) {
        self.federation.add_peer(address);
    }

    /// Drop a peer.
    pub fn remove_peer(&self, address: &str) -> bool {
        self.federation.remove_peer(address)
    }

    /// Current view of all peers.
    pub fn peers(&self) -> Vec<FederationPeer> {
        self.federation.peers()
    }

    /// Ask the running federation loop for an immediate round.
    pub async fn trigger_sync(&self) {
        self.federation.trigger_sync().await;
    }

    /// Run one synchronous federation round (used by tests and by
    /// operators forcing a sync).
    pub async fn sync_now(&self) {
        self.federation.sync_now().await;
    }

    // ========== Disaster Recovery ==========

    /// Full fleet snapshot, ordered by node ID.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.store.snapshot()
    }

    /// Persist the current snapshot to the configured snapshot store.
    ///
    /// A storage failure here is the one fatal condition: it is returned
    /// to the caller as a process-health failure, never swallowed.
    pub async fn persist_snapshot(&self) -> Result<usize> {
        let snapshot_store = self
            .snapshot_store
            .as_ref()
            .ok_or_else(|| ControlPlaneError::InvalidRequest("no snapshot store configured".into()))?;

        let records = self.store.snapshot();
        snapshot_store.persist(&records).await?;
        info!(records = records.len(), "Snapshot persisted");
        Ok(records.len())
    }

    /// Replay a snapshot through the normal apply path as synthetic
    /// discovery events.
    pub async fn restore(&self, records: Vec<NodeRecord>, ctx: &RequestContext) -> Result<usize> {
        let mut applied = 0usize;
        for record in records {
            let node_id = record.id.clone();
            let envelope = self.envelope(
                NexusEvent::NodeDiscovered { record },
                EventSource::ControlPlane,
                ctx,
            );
            match self.store.apply(&envelope) {
                Ok(_) => {
                    self.bus.publish(envelope);
                    applied += 1;
                }
                Err(e) => {
                    warn!(node_id = %node_id, error = %e, "Record skipped during restore");
                }
            }
        }
        info!(records = applied, "Snapshot restored");
        Ok(applied)
    }

    /// Load the latest persisted snapshot and replay it.
    pub async fn restore_latest(&self, ctx: &RequestContext) -> Result<usize> {
        let snapshot_store = self
            .snapshot_store
            .as_ref()
            .ok_or_else(|| ControlPlaneError::InvalidRequest("no snapshot store configured".into()))?;

        match snapshot_store.load().await? {
            Some(records) => self.restore(records, ctx).await,
            None => Ok(0),
        }
    }

    // ========== Events ==========

    /// Subscribe to events matching a filter, for API push and
    /// observability (read-only collaborators).
    pub fn subscribe_events(&self, name: impl Into<String>, filter: EventFilter) -> Subscription {
        self.bus.subscribe(name, filter)
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self, name: impl Into<String>) -> Subscription {
        self.bus.subscribe_all(name)
    }

    // ========== Internal ==========

    fn envelope(
        &self,
        event: NexusEvent,
        source: EventSource,
        ctx: &RequestContext,
    ) -> NexusEventEnvelope {
        let mut envelope =
            NexusEventEnvelope::new(event, source, self.controller_id.clone())
                .with_actor(ctx.actor_id());
        envelope.correlation_id = ctx.correlation_id.clone();
        envelope
    }

    /// Record a failed invocation: result event plus induced status.
    fn record_fault(
        &self,
        node_id: &NodeId,
        capability: &str,
        source: &ProviderError,
        ctx: &RequestContext,
    ) {
        warn!(node_id = %node_id, capability = capability, error = %source, "Command failed");
        self.publish_command_result(
            node_id,
            capability,
            false,
            json!({ "error": source.to_string() }),
            ctx,
        );
        self.observe_status(node_id, NodeStatus::Degraded, ctx);
    }

    fn publish_command_result(
        &self,
        node_id: &NodeId,
        capability: &str,
        success: bool,
        output: Value,
        ctx: &RequestContext,
    ) {
        self.publish_apply(node_id, ctx, |base_version| NexusEvent::CommandResult {
            node_id: node_id.clone(),
            capability: capability.to_string(),
            success,
            output: output.clone(),
            base_version,
        });
    }

    /// Apply a status observation unless it matches the current one.
    ///
    /// `Unreachable` is owned by the circuit breaker: a provider fault on
    /// a node the breaker already isolated stays `Unreachable` until a
    /// successful call reports `Healthy`.
    fn observe_status(&self, node_id: &NodeId, status: NodeStatus, ctx: &RequestContext) {
        match self.store.get(node_id) {
            Some(record) if record.status == status => return,
            Some(record)
                if record.status == NodeStatus::Unreachable
                    && status == NodeStatus::Degraded =>
            {
                return
            }
            None => return,
            _ => {}
        }
        self.publish_apply(node_id, ctx, |base_version| NexusEvent::StatusChanged {
            node_id: node_id.clone(),
            status,
            base_version,
        });
    }

    /// Build a version-bearing event from the current record, apply it,
    /// and publish it. A conflict means another writer got in between:
    /// retried once with a fresh read, as the conflict contract requires.
    fn publish_apply<F>(&self, node_id: &NodeId, ctx: &RequestContext, build: F)
    where
        F: Fn(u64) -> NexusEvent,
    {
        for attempt in 0..2 {
            let record = match self.store.get(node_id) {
                Some(record) => record,
                None => {
                    warn!(node_id = %node_id, "Node vanished before event apply");
                    return;
                }
            };

            let envelope = self.envelope(
                build(record.version),
                EventSource::ControlPlane,
                ctx,
            );

            match self.store.apply(&envelope) {
                Ok(_) => {
                    self.bus.publish(envelope);
                    return;
                }
                Err(e) if e.is_conflict() && attempt == 0 => {
                    debug!(node_id = %node_id, "Version conflict, retrying with fresh read");
                }
                Err(e) => {
                    warn!(node_id = %node_id, error = %e, "Event apply failed");
                    return;
                }
            }
        }
    }
}
