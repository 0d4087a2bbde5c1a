//! Nexus Breaker - circuit breaking for provider calls
//!
//! Wraps any provider invocation, tracking the failure rate inside a
//! sliding window and short-circuiting calls to an unhealthy provider.
//! Prevents cascading failures: an open circuit fails fast without touching
//! the backend, then probes it once per backoff interval until it recovers.

#![deny(unsafe_code)]

pub mod breaker;
pub mod config;

pub use breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitState};
pub use config::BreakerConfig;
