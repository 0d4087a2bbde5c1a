//! Circuit breaker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one node's circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Number of failures inside the window that opens the circuit.
    pub failure_threshold: u32,

    /// Width of the sliding failure window.
    pub window: Duration,

    /// Time to wait before the first half-open probe after opening.
    pub reset_timeout: Duration,

    /// Backoff cap: the retry delay doubles on every failed probe but
    /// never exceeds this.
    pub max_backoff: Duration,

    /// Deadline applied to every gated call; exceeding it counts as a
    /// provider fault.
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.window, Duration::from_secs(60));
    }
}
