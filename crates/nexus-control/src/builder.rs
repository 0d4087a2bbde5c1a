//! Builder for ControlPlane
//!
//! The builder wires the subsystems together: one bus, one store, a
//! registry over them, and federation over the supplied peer transport.

use std::sync::Arc;

use nexus_breaker::BreakerConfig;
use nexus_events::EventBus;
use nexus_federation::{FederationConfig, FederationSync, PeerTransport};
use nexus_provider::{AdapterFactory, PluginRegistry};
use nexus_state::{SnapshotStore, StateStore};
use nexus_types::ControllerId;

use crate::control_plane::{ControlPlane, ControlPlaneConfig};
use crate::error::{ControlPlaneError, Result};

/// Default per-subscriber event ring capacity.
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Builder for constructing a ControlPlane with all dependencies
pub struct ControlPlaneBuilder {
    controller_id: ControllerId,
    event_capacity: usize,
    breaker_config: BreakerConfig,
    federation_config: FederationConfig,
    control_config: ControlPlaneConfig,
    transport: Option<Arc<dyn PeerTransport>>,
    factories: Vec<Arc<dyn AdapterFactory>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl ControlPlaneBuilder {
    /// Create a builder for a controller with the given identity.
    pub fn new(controller_id: ControllerId) -> Self {
        Self {
            controller_id,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            breaker_config: BreakerConfig::default(),
            federation_config: FederationConfig::default(),
            control_config: ControlPlaneConfig::default(),
            transport: None,
            factories: Vec::new(),
            snapshot_store: None,
        }
    }

    /// Set the peer transport (required).
    pub fn with_transport(mut self, transport: Arc<dyn PeerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register an adapter factory.
    pub fn with_adapter_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Set the circuit breaker configuration shared by all nodes.
    pub fn with_breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Set the federation configuration.
    pub fn with_federation_config(mut self, config: FederationConfig) -> Self {
        self.federation_config = config;
        self
    }

    /// Set the facade configuration.
    pub fn with_control_config(mut self, config: ControlPlaneConfig) -> Self {
        self.control_config = config;
        self
    }

    /// Set the per-subscriber event ring capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the snapshot persistence backend for disaster recovery.
    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Build the control plane with all components
    pub fn build(self) -> Result<ControlPlane> {
        let transport = self
            .transport
            .ok_or_else(|| ControlPlaneError::InvalidRequest("peer transport required".into()))?;

        let bus = EventBus::with_capacity(self.controller_id.clone(), self.event_capacity);
        let store = Arc::new(StateStore::new());

        let registry = Arc::new(PluginRegistry::new(
            store.clone(),
            bus.sender(),
            self.controller_id.clone(),
            self.breaker_config,
        ));
        for factory in self.factories {
            registry.register(factory)?;
        }

        let (federation, federation_rx) = FederationSync::new(
            self.federation_config,
            store.clone(),
            transport,
            bus.sender(),
            self.controller_id.clone(),
        );

        Ok(ControlPlane::new(
            self.controller_id,
            bus,
            store,
            registry,
            federation,
            federation_rx,
            self.snapshot_store,
            self.control_config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_federation::InMemoryTransport;
    use nexus_provider::{ScriptedAdapter, ScriptedAdapterFactory};

    #[test]
    fn test_builder_requires_transport() {
        let result = ControlPlaneBuilder::new(ControllerId::new("ctl-a")).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_complete() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let result = ControlPlaneBuilder::new(ControllerId::new("ctl-a"))
            .with_transport(Arc::new(InMemoryTransport::new()))
            .with_adapter_factory(Arc::new(ScriptedAdapterFactory::new(adapter)))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_builder_rejects_duplicate_factories() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let result = ControlPlaneBuilder::new(ControllerId::new("ctl-a"))
            .with_transport(Arc::new(InMemoryTransport::new()))
            .with_adapter_factory(Arc::new(ScriptedAdapterFactory::new(adapter.clone())))
            .with_adapter_factory(Arc::new(ScriptedAdapterFactory::new(adapter)))
            .build();
        assert!(result.is_err());
    }
}
