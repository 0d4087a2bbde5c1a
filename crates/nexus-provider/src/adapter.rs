//! Provider adapter traits
//!
//! One adapter instance fronts one node. The capability set is fixed when
//! the adapter is built and immutable for the adapter's lifetime.

use std::sync::Arc;

use async_trait::async_trait;
use nexus_types::{Capability, NodeRecord, ProviderKind};
use serde_json::Value;

use crate::error::ProviderError;

/// Uniform interface over a concrete backend.
///
/// Implementations must only be invoked with capability names they
/// advertise; the registry screens unsupported names before any call
/// reaches the breaker.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider family this adapter belongs to.
    fn kind(&self) -> ProviderKind;

    /// The commands this adapter exposes.
    fn capabilities(&self) -> Vec<Capability>;

    /// Whether a capability name is advertised.
    fn supports(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|c| c.name == capability)
    }

    /// Invoke a capability against the backend.
    async fn invoke(&self, capability: &str, args: &Value) -> Result<Value, ProviderError>;
}

/// Builds adapters for nodes of one provider kind.
///
/// Registered with the plugin registry at startup or at runtime; the
/// registry calls `build` lazily on first resolution of a node.
pub trait AdapterFactory: Send + Sync {
    /// The provider kind this factory serves.
    fn kind(&self) -> ProviderKind;

    /// Build an adapter for the given node.
    fn build(&self, record: &NodeRecord) -> Arc<dyn ProviderAdapter>;
}
