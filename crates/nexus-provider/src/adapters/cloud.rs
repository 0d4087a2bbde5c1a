//! Cloud provider adapter
//!
//! JSON-over-HTTP calls against a cloud management endpoint. The node
//! address is the base URL of the instance's API.

use std::sync::Arc;

use async_trait::async_trait;
use nexus_types::{Capability, NodeRecord, ProviderKind};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapter::{AdapterFactory, ProviderAdapter};
use crate::error::ProviderError;

/// Adapter for one cloud-managed instance.
pub struct CloudAdapter {
    base_url: String,
    client: Client,
}

impl CloudAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, client }
    }

    async fn get(&self, path: &str) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Cloud GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Self::parse(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Cloud POST");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Self::parse(response).await
    }

    async fn parse(response: reqwest::Response) -> Result<Value, ProviderError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Remote {
                message: format!("HTTP {}: {}", status.as_u16(), body.trim()),
                exit_code: Some(status.as_u16() as i32),
            });
        }

        if body.is_empty() {
            return Ok(json!({ "status": status.as_u16() }));
        }
        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("invalid JSON response: {}", e)))
    }
}

#[async_trait]
impl ProviderAdapter for CloudAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cloud
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::v1("status").with_description("instance status"),
            Capability::v1("reboot").with_description("reboot the instance"),
            Capability::v1("healthcheck").with_description("API liveness probe"),
        ]
    }

    async fn invoke(&self, capability: &str, args: &Value) -> Result<Value, ProviderError> {
        match capability {
            "status" => self.get("/v1/status").await,
            "reboot" => self.post("/v1/reboot", args).await,
            "healthcheck" => self.get("/v1/health").await,
            other => Err(ProviderError::Malformed(format!(
                "capability {} not routed by cloud adapter",
                other
            ))),
        }
    }
}

/// Factory registered for [`ProviderKind::Cloud`].
///
/// One HTTP client is shared across every adapter the factory builds.
pub struct CloudAdapterFactory {
    client: Client,
}

impl CloudAdapterFactory {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for CloudAdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFactory for CloudAdapterFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cloud
    }

    fn build(&self, record: &NodeRecord) -> Arc<dyn ProviderAdapter> {
        Arc::new(CloudAdapter::with_client(
            record.address.clone(),
            self.client.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let adapter = CloudAdapter::new("https://api.example.com/");
        assert_eq!(adapter.base_url, "https://api.example.com");
    }

    #[test]
    fn test_capabilities_advertised() {
        let adapter = CloudAdapter::new("https://api.example.com");
        assert!(adapter.supports("reboot"));
        assert!(!adapter.supports("restart"));
    }
}
