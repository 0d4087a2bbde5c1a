//! Scripted adapter for custom providers and tests
//!
//! Serves the `custom` provider kind: responses are configured up front
//! and failure modes can be toggled at runtime. Integration tests use it
//! wherever a real backend would sit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use nexus_types::{Capability, NodeRecord, ProviderKind};
use serde_json::{json, Value};

use crate::adapter::{AdapterFactory, ProviderAdapter};
use crate::error::ProviderError;

/// An adapter whose behavior is fully scripted.
pub struct ScriptedAdapter {
    kind: ProviderKind,
    capabilities: Vec<Capability>,
    responses: DashMap<String, Value>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    invocations: AtomicU64,
}

impl ScriptedAdapter {
    /// A custom-kind adapter advertising `ping`.
    pub fn new() -> Self {
        Self::with_kind(ProviderKind::Custom)
    }

    /// A scripted adapter posing as the given provider kind.
    pub fn with_kind(kind: ProviderKind) -> Self {
        Self {
            kind,
            capabilities: vec![Capability::v1("ping")],
            responses: DashMap::new(),
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            invocations: AtomicU64::new(0),
        }
    }

    /// Advertise an additional capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Script the response for a capability.
    pub fn respond_with(&self, capability: impl Into<String>, value: Value) {
        self.responses.insert(capability.into(), value);
    }

    /// Make every invocation fail with a transport error.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap() = Some(message.into());
    }

    /// Clear a scripted failure.
    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Delay every invocation, for exercising deadlines.
    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// How many times `invoke` ran.
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    async fn invoke(&self, capability: &str, _args: &Value) -> Result<Value, ProviderError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(ProviderError::Transport(message));
        }

        Ok(self
            .responses
            .get(capability)
            .map(|v| v.clone())
            .unwrap_or_else(|| json!({ "ok": true })))
    }
}

/// Factory that hands out one shared scripted adapter for every node.
///
/// Sharing the instance lets a test keep a handle and flip its behavior
/// while the registry uses it.
pub struct ScriptedAdapterFactory {
    adapter: Arc<ScriptedAdapter>,
}

impl ScriptedAdapterFactory {
    pub fn new(adapter: Arc<ScriptedAdapter>) -> Self {
        Self { adapter }
    }

    /// Handle to the shared adapter.
    pub fn adapter(&self) -> Arc<ScriptedAdapter> {
        self.adapter.clone()
    }
}

impl AdapterFactory for ScriptedAdapterFactory {
    fn kind(&self) -> ProviderKind {
        self.adapter.kind
    }

    fn build(&self, _record: &NodeRecord) -> Arc<dyn ProviderAdapter> {
        self.adapter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_response() {
        let adapter = ScriptedAdapter::new();
        adapter.respond_with("ping", json!({ "pong": true }));

        let result = adapter.invoke("ping", &json!({})).await.unwrap();
        assert_eq!(result, json!({ "pong": true }));
        assert_eq!(adapter.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure_toggles() {
        let adapter = ScriptedAdapter::new();
        adapter.fail_with("backend down");

        let err = adapter.invoke("ping", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));

        adapter.succeed();
        assert!(adapter.invoke("ping", &json!({})).await.is_ok());
    }
}
