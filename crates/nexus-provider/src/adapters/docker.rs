//! Docker provider adapter
//!
//! Drives a Docker engine through the `docker` CLI. The node address is
//! passed as the daemon host (`tcp://host:2375`,
//! `unix:///var/run/docker.sock`, or an `ssh://` target).

use std::sync::Arc;

use async_trait::async_trait;
use nexus_types::{Capability, NodeRecord, ProviderKind};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::adapter::{AdapterFactory, ProviderAdapter};
use crate::error::ProviderError;

/// Adapter for one Docker engine.
pub struct DockerAdapter {
    /// Daemon address handed to `docker -H`.
    host: String,
}

impl DockerAdapter {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    async fn run_docker(&self, args: &[&str]) -> Result<Value, ProviderError> {
        debug!(host = %self.host, args = ?args, "Running docker command");

        let output = Command::new("docker")
            .arg("-H")
            .arg(&self.host)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to spawn docker: {}", e)))?;

        if !output.status.success() {
            return Err(ProviderError::Remote {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                exit_code: output.status.code(),
            });
        }

        Ok(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
        }))
    }

    fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ProviderError> {
        args.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed(format!("missing argument: {}", key)))
    }
}

#[async_trait]
impl ProviderAdapter for DockerAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::v1("ps").with_description("list running containers"),
            Capability::v1("restart").with_description("restart a container"),
            Capability::v1("logs").with_description("tail container logs"),
            Capability::v1("healthcheck").with_description("daemon liveness probe"),
        ]
    }

    async fn invoke(&self, capability: &str, args: &Value) -> Result<Value, ProviderError> {
        match capability {
            "ps" => {
                let result = self
                    .run_docker(&["ps", "--format", "{{.Names}}\t{{.Status}}"])
                    .await?;
                let containers: Vec<&str> = result["stdout"]
                    .as_str()
                    .unwrap_or_default()
                    .lines()
                    .filter(|l| !l.is_empty())
                    .collect();
                Ok(json!({ "containers": containers }))
            }
            "restart" => {
                let container = Self::required_str(args, "container")?;
                self.run_docker(&["restart", container]).await?;
                Ok(json!({ "restarted": container }))
            }
            "logs" => {
                let container = Self::required_str(args, "container")?;
                let tail = args
                    .get("tail")
                    .and_then(Value::as_u64)
                    .unwrap_or(50)
                    .to_string();
                self.run_docker(&["logs", "--tail", &tail, container]).await
            }
            "healthcheck" => {
                let result = self
                    .run_docker(&["info", "--format", "{{.ServerVersion}}"])
                    .await?;
                Ok(json!({
                    "healthy": true,
                    "server_version": result["stdout"].as_str().unwrap_or_default().trim(),
                }))
            }
            other => Err(ProviderError::Malformed(format!(
                "capability {} not routed by docker adapter",
                other
            ))),
        }
    }
}

/// Factory registered for [`ProviderKind::Docker`].
#[derive(Default)]
pub struct DockerAdapterFactory;

impl AdapterFactory for DockerAdapterFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    fn build(&self, record: &NodeRecord) -> Arc<dyn ProviderAdapter> {
        Arc::new(DockerAdapter::new(record.address.clone()))
    }
}
