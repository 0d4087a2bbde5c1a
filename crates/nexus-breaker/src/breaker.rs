//! Circuit breaker implementation
//!
//! Tracks provider faults inside a sliding window and transitions between
//! states:
//! - Closed: normal operation, calls pass through
//! - Open: too many recent faults, calls fail fast
//! - Half-Open: backoff elapsed, exactly one probe call allowed

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nexus_types::{ControllerId, EventSource, NexusEvent, NexusEventEnvelope, NodeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally.
    Closed,

    /// Circuit is open, calls fail fast.
    Open,

    /// Circuit is testing whether the provider has recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Circuit is open; the provider was not invoked.
    #[error("circuit open for {node_id}, retry at {retry_at}")]
    Open {
        node_id: NodeId,
        retry_at: DateTime<Utc>,
    },

    /// The call exceeded the configured provider deadline. Counted as a
    /// provider fault.
    #[error("provider call timed out after {after:?}")]
    Timeout { after: Duration },

    /// The provider itself failed. Counted as a provider fault.
    #[error("provider call failed: {0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the wrapped call was short-circuited without being invoked.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Mutable breaker state, guarded by one lock.
struct BreakerCore {
    state: CircuitState,

    /// Fault timestamps inside the sliding window.
    failures: VecDeque<Instant>,

    /// Consecutive opens without an intervening successful close; drives
    /// exponential backoff.
    reopens: u32,

    /// Monotonic deadline for the open -> half-open transition.
    next_retry: Option<Instant>,

    /// Wall-clock mirror of `next_retry` for events and stats.
    next_retry_wall: Option<DateTime<Utc>>,

    /// Whether the single half-open probe slot is taken.
    probe_in_flight: bool,

    /// Time of last state change.
    last_transition: DateTime<Utc>,
}

/// Circuit breaker for a single node's provider.
///
/// Owned one-per-node by the plugin registry; never shared between nodes.
pub struct CircuitBreaker {
    node_id: NodeId,
    config: BreakerConfig,
    core: Mutex<BreakerCore>,
    events: broadcast::Sender<NexusEventEnvelope>,
    origin: ControllerId,
}

impl CircuitBreaker {
    /// Create a new breaker for a node.
    pub fn new(
        node_id: NodeId,
        config: BreakerConfig,
        events: broadcast::Sender<NexusEventEnvelope>,
        origin: ControllerId,
    ) -> Self {
        Self {
            node_id,
            config,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                reopens: 0,
                next_retry: None,
                next_retry_wall: None,
                probe_in_flight: false,
                last_transition: Utc::now(),
            }),
            events,
            origin,
        }
    }

    /// Get the node ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Get the current state, applying any due open -> half-open
    /// transition first.
    pub fn state(&self) -> CircuitState {
        let mut core = self.core.lock().unwrap();
        self.check_timeout(&mut core);
        core.state
    }

    /// Run a provider call through the breaker.
    ///
    /// When the circuit is open the future is never constructed-upon:
    /// `BreakerError::Open` is returned immediately. Otherwise the call
    /// runs under the configured deadline; a timeout or provider error is
    /// recorded as a fault.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if let Err(retry_at) = self.acquire() {
            return Err(BreakerError::Open {
                node_id: self.node_id.clone(),
                retry_at,
            });
        }

        match tokio::time::timeout(self.config.call_timeout, f()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.record_failure();
                Err(BreakerError::Timeout {
                    after: self.config.call_timeout,
                })
            }
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut core = self.core.lock().unwrap();

        match core.state {
            CircuitState::Closed => {
                core.failures.clear();
            }
            CircuitState::HalfOpen => {
                info!(node_id = %self.node_id, "Circuit closing after successful probe");
                self.transition_to(&mut core, CircuitState::Closed);
                self.emit(NexusEvent::CircuitClosed {
                    node_id: self.node_id.clone(),
                });
            }
            CircuitState::Open => {
                debug!(node_id = %self.node_id, "Success recorded while circuit open");
            }
        }
    }

    /// Record a provider fault.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut core = self.core.lock().unwrap();

        match core.state {
            CircuitState::Closed => {
                core.failures.push_back(now);
                self.prune_window(&mut core, now);

                if core.failures.len() as u32 >= self.config.failure_threshold {
                    warn!(
                        node_id = %self.node_id,
                        failures = core.failures.len(),
                        window_secs = self.config.window.as_secs(),
                        "Circuit opening, failure threshold exceeded"
                    );
                    core.reopens = 0;
                    self.open(&mut core, now);
                }
            }
            CircuitState::HalfOpen => {
                core.reopens = core.reopens.saturating_add(1);
                warn!(
                    node_id = %self.node_id,
                    reopens = core.reopens,
                    "Circuit re-opening after failed probe"
                );
                self.open(&mut core, now);
            }
            CircuitState::Open => {
                // Already open, nothing to count.
            }
        }
    }

    /// Reset the breaker to closed.
    pub fn reset(&self) {
        let mut core = self.core.lock().unwrap();
        if core.state != CircuitState::Closed {
            info!(node_id = %self.node_id, "Circuit breaker reset");
            self.transition_to(&mut core, CircuitState::Closed);
            self.emit(NexusEvent::CircuitClosed {
                node_id: self.node_id.clone(),
            });
        }
    }

    /// Get breaker statistics.
    pub fn stats(&self) -> BreakerStats {
        let mut core = self.core.lock().unwrap();
        self.check_timeout(&mut core);
        BreakerStats {
            node_id: self.node_id.clone(),
            state: core.state,
            recent_failures: core.failures.len() as u32,
            reopens: core.reopens,
            next_retry_at: core.next_retry_wall,
            last_transition: core.last_transition,
        }
    }

    /// Claim the right to make a call; `Err` carries the fail-fast retry
    /// deadline.
    fn acquire(&self) -> Result<(), DateTime<Utc>> {
        let mut core = self.core.lock().unwrap();
        self.check_timeout(&mut core);

        match core.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(core.next_retry_wall.unwrap_or_else(Utc::now)),
            CircuitState::HalfOpen => {
                if core.probe_in_flight {
                    Err(core.next_retry_wall.unwrap_or_else(Utc::now))
                } else {
                    core.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Transition open -> half-open once the retry deadline has passed.
    fn check_timeout(&self, core: &mut BreakerCore) {
        if core.state != CircuitState::Open {
            return;
        }
        if let Some(deadline) = core.next_retry {
            if Instant::now() >= deadline {
                debug!(node_id = %self.node_id, "Circuit half-open, probe allowed");
                self.transition_to(core, CircuitState::HalfOpen);
            }
        }
    }

    /// Open the circuit and schedule the next probe with exponential
    /// backoff.
    fn open(&self, core: &mut BreakerCore, now: Instant) {
        let backoff = self.backoff(core.reopens);
        self.transition_to(core, CircuitState::Open);
        core.next_retry = Some(now + backoff);
        let retry_at = Utc::now()
            + chrono::Duration::milliseconds(backoff.as_millis().min(i64::MAX as u128) as i64);
        core.next_retry_wall = Some(retry_at);

        self.emit(NexusEvent::CircuitOpened {
            node_id: self.node_id.clone(),
            retry_at,
        });
    }

    /// Backoff delay for the given reopen count, doubled per reopen and
    /// capped.
    fn backoff(&self, reopens: u32) -> Duration {
        let factor = 1u32 << reopens.min(16);
        std::cmp::min(
            self.config.reset_timeout.saturating_mul(factor),
            self.config.max_backoff,
        )
    }

    /// Transition to a new state, resetting counters as needed.
    fn transition_to(&self, core: &mut BreakerCore, new_state: CircuitState) {
        core.state = new_state;
        core.last_transition = Utc::now();
        core.probe_in_flight = false;

        match new_state {
            CircuitState::Closed => {
                core.failures.clear();
                core.reopens = 0;
                core.next_retry = None;
                core.next_retry_wall = None;
            }
            CircuitState::Open => {
                core.failures.clear();
            }
            CircuitState::HalfOpen => {}
        }
    }

    /// Drop fault timestamps that fell out of the sliding window.
    fn prune_window(&self, core: &mut BreakerCore, now: Instant) {
        while let Some(front) = core.failures.front() {
            if now.duration_since(*front) > self.config.window {
                core.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn emit(&self, event: NexusEvent) {
        let _ = self.events.send(NexusEventEnvelope::new(
            event,
            EventSource::Breaker,
            self.origin.clone(),
        ));
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    /// Node this breaker guards.
    pub node_id: NodeId,

    /// Current state.
    pub state: CircuitState,

    /// Fault count inside the current window.
    pub recent_failures: u32,

    /// Consecutive reopens driving the current backoff.
    pub reopens: u32,

    /// When the next probe becomes allowed, if open.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Time of last state transition.
    pub last_transition: DateTime<Utc>,
}
