//! Federation configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the sync loop and peer lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Interval between sync rounds.
    pub sync_interval: Duration,

    /// Consecutive failures that move a synced peer to disconnected.
    pub failure_threshold: u32,

    /// Consecutive failures that evict a peer entirely.
    pub eviction_threshold: u32,

    /// Deadline for a handshake attempt.
    pub handshake_timeout: Duration,

    /// Deadline for shipping one delta batch.
    pub push_timeout: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            failure_threshold: 3,
            eviction_threshold: 9,
            handshake_timeout: Duration::from_secs(5),
            push_timeout: Duration::from_secs(10),
        }
    }
}
