//! SSH provider adapter
//!
//! Drives a remote host over the system `ssh` binary in batch mode. The
//! node address is the ssh target (`user@host` or a `Host` alias from the
//! operator's ssh config).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus_types::{Capability, NodeRecord, ProviderKind};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::adapter::{AdapterFactory, ProviderAdapter};
use crate::error::ProviderError;

/// ssh reserves exit status 255 for its own (transport) failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Adapter for one SSH-managed host.
pub struct SshAdapter {
    /// ssh target, e.g. `admin@10.0.0.5`.
    target: String,

    /// Connection timeout passed to ssh.
    connect_timeout: Duration,
}

impl SshAdapter {
    pub fn new(target: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            target: target.into(),
            connect_timeout,
        }
    }

    /// Run a remote command and normalize the output.
    async fn run_remote(&self, remote_command: &str) -> Result<Value, ProviderError> {
        debug!(target = %self.target, command = remote_command, "Running ssh command");

        let output = Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            ))
            .arg(&self.target)
            .arg(remote_command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to spawn ssh: {}", e)))?;

        let exit_code = output.status.code();
        if exit_code == Some(SSH_TRANSPORT_EXIT) {
            return Err(ProviderError::Transport(format!(
                "ssh to {} failed: {}",
                self.target,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(json!({
            "exit_code": exit_code,
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }

    fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ProviderError> {
        args.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Malformed(format!("missing argument: {}", key)))
    }
}

#[async_trait]
impl ProviderAdapter for SshAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ssh
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::v1("exec").with_description("run a shell command"),
            Capability::v1("healthcheck").with_description("liveness probe"),
            Capability::v1("restart").with_description("restart a systemd unit"),
            Capability::v1("uptime").with_description("host uptime"),
        ]
    }

    async fn invoke(&self, capability: &str, args: &Value) -> Result<Value, ProviderError> {
        match capability {
            // `exec` reports the remote exit code in the payload; a
            // non-zero command is a result, not a provider fault.
            "exec" => {
                let command = Self::required_str(args, "command")?;
                self.run_remote(command).await
            }
            "healthcheck" => {
                let result = self.run_remote("true").await?;
                if result["exit_code"] == json!(0) {
                    Ok(json!({ "healthy": true }))
                } else {
                    Err(ProviderError::Remote {
                        message: format!("healthcheck failed on {}", self.target),
                        exit_code: result["exit_code"].as_i64().map(|c| c as i32),
                    })
                }
            }
            "restart" => {
                let unit = Self::required_str(args, "unit")?;
                let result = self
                    .run_remote(&format!("sudo systemctl restart {}", unit))
                    .await?;
                if result["exit_code"] == json!(0) {
                    Ok(json!({ "restarted": unit }))
                } else {
                    Err(ProviderError::Remote {
                        message: format!("restart of {} failed", unit),
                        exit_code: result["exit_code"].as_i64().map(|c| c as i32),
                    })
                }
            }
            "uptime" => self.run_remote("uptime -p").await,
            other => Err(ProviderError::Malformed(format!(
                "capability {} not routed by ssh adapter",
                other
            ))),
        }
    }
}

/// Factory registered for [`ProviderKind::Ssh`].
pub struct SshAdapterFactory {
    connect_timeout: Duration,
}

impl SshAdapterFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SshAdapterFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl AdapterFactory for SshAdapterFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ssh
    }

    fn build(&self, record: &NodeRecord) -> Arc<dyn ProviderAdapter> {
        Arc::new(SshAdapter::new(record.address.clone(), self.connect_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_advertised() {
        let adapter = SshAdapter::new("admin@host", Duration::from_secs(5));
        assert!(adapter.supports("exec"));
        assert!(adapter.supports("healthcheck"));
        assert!(!adapter.supports("ps"));
    }

    #[tokio::test]
    async fn test_missing_argument_is_malformed() {
        let adapter = SshAdapter::new("admin@host", Duration::from_secs(5));
        let err = adapter.invoke("exec", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
