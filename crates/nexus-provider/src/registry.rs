//! Plugin registry
//!
//! Maps provider kinds to adapter factories and nodes to live adapters.
//! The registry owns exactly one circuit breaker per node for the node's
//! lifetime; every resolution hands back the adapter already paired with
//! its breaker so no call can bypass the gate.

use std::sync::Arc;

use dashmap::DashMap;
use nexus_breaker::{BreakerConfig, BreakerError, BreakerStats, CircuitBreaker};
use nexus_state::StateStore;
use nexus_types::{
    Capability, ControllerId, NexusEventEnvelope, NodeId, ProviderKind,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::adapter::{AdapterFactory, ProviderAdapter};
use crate::error::{ProviderError, RegistryError, Result};

/// Registry of adapter factories and per-node breakers.
pub struct PluginRegistry {
    factories: DashMap<ProviderKind, Arc<dyn AdapterFactory>>,
    adapters: DashMap<NodeId, Arc<dyn ProviderAdapter>>,
    breakers: DashMap<NodeId, Arc<CircuitBreaker>>,
    store: Arc<StateStore>,
    events: broadcast::Sender<NexusEventEnvelope>,
    origin: ControllerId,
    breaker_config: BreakerConfig,
}

impl PluginRegistry {
    /// Create a registry over the given state store.
    pub fn new(
        store: Arc<StateStore>,
        events: broadcast::Sender<NexusEventEnvelope>,
        origin: ControllerId,
        breaker_config: BreakerConfig,
    ) -> Self {
        Self {
            factories: DashMap::new(),
            adapters: DashMap::new(),
            breakers: DashMap::new(),
            store,
            events,
            origin,
            breaker_config,
        }
    }

    /// Register an adapter factory for its provider kind.
    pub fn register(&self, factory: Arc<dyn AdapterFactory>) -> Result<()> {
        let kind = factory.kind();
        if self.factories.contains_key(&kind) {
            return Err(RegistryError::DuplicateFactory(kind));
        }
        info!(provider = %kind, "Adapter factory registered");
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Provider kinds with a registered factory.
    pub fn registered_kinds(&self) -> Vec<ProviderKind> {
        self.factories.iter().map(|entry| *entry.key()).collect()
    }

    /// Resolve a node to its adapter, wrapped in the node's breaker.
    pub fn resolve(&self, node_id: &NodeId) -> Result<GuardedAdapter> {
        let record = self
            .store
            .get(node_id)
            .ok_or_else(|| RegistryError::UnknownNode(node_id.clone()))?;

        let factory = self
            .factories
            .get(&record.provider)
            .ok_or_else(|| RegistryError::UnsupportedProvider {
                node_id: node_id.clone(),
                kind: record.provider,
            })?;

        let adapter = self
            .adapters
            .entry(node_id.clone())
            .or_insert_with(|| {
                debug!(node_id = %node_id, provider = %record.provider, "Building adapter");
                factory.build(&record)
            })
            .clone();

        let breaker = self
            .breakers
            .entry(node_id.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    node_id.clone(),
                    self.breaker_config.clone(),
                    self.events.clone(),
                    self.origin.clone(),
                ))
            })
            .clone();

        Ok(GuardedAdapter {
            node_id: node_id.clone(),
            adapter,
            breaker,
        })
    }

    /// Capabilities of a node's adapter.
    pub fn list_capabilities(&self, node_id: &NodeId) -> Result<Vec<Capability>> {
        Ok(self.resolve(node_id)?.adapter.capabilities())
    }

    /// Whether a node's adapter advertises the capability. Distinct from
    /// resolution failures so the breaker never counts it.
    pub fn supports(&self, node_id: &NodeId, capability: &str) -> Result<bool> {
        Ok(self.resolve(node_id)?.adapter.supports(capability))
    }

    /// Drop the cached adapter for a node; the breaker and its history
    /// survive. Called when a node is re-announced with fresh metadata.
    pub fn evict(&self, node_id: &NodeId) {
        if self.adapters.remove(node_id).is_some() {
            debug!(node_id = %node_id, "Cached adapter evicted");
        }
    }

    /// Forget a node entirely: adapter and breaker.
    pub fn remove_node(&self, node_id: &NodeId) {
        self.adapters.remove(node_id);
        self.breakers.remove(node_id);
    }

    /// Breaker statistics for a node, if one has been created.
    pub fn breaker_stats(&self, node_id: &NodeId) -> Option<BreakerStats> {
        self.breakers.get(node_id).map(|b| b.stats())
    }
}

/// An adapter paired with the circuit breaker that gates it.
pub struct GuardedAdapter {
    node_id: NodeId,
    adapter: Arc<dyn ProviderAdapter>,
    breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for GuardedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedAdapter")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl GuardedAdapter {
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Invoke a capability through the breaker.
    ///
    /// The caller must have screened the capability name already;
    /// unsupported names belong to [`RegistryError`], not this path.
    pub async fn invoke(
        &self,
        capability: &str,
        args: &Value,
    ) -> std::result::Result<Value, BreakerError<ProviderError>> {
        let adapter = self.adapter.clone();
        let capability = capability.to_string();
        let args = args.clone();
        self.breaker
            .call(move || async move { adapter.invoke(&capability, &args).await })
            .await
    }
}
