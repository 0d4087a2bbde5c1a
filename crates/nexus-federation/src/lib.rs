//! Nexus Federation - eventually-consistent state exchange between peers
//!
//! Each controller periodically ships its state-store deltas to every
//! synced peer and applies incoming deltas through the normal state-store
//! apply path, so the same optimistic-concurrency rules govern local and
//! remote mutations. This is best-effort gossip, not consensus: a stalled
//! peer degrades its own connectivity state and nothing else.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod peer;
pub mod sync;
pub mod transport;

pub use config::FederationConfig;
pub use error::{FederationError, Result};
pub use peer::{FederationPeer, PeerStatus};
pub use sync::FederationSync;
pub use transport::{delta_envelopes, InMemoryTransport, PeerHello, PeerTransport};
