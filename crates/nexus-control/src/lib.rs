//! Nexus Control - the unified control plane facade
//!
//! The single entry point external collaborators (API server, WebSocket
//! push, CLI) call. It composes the event bus, state store, plugin
//! registry, and federation sync behind one API: commands resolve through
//! the registry, run gated by the node's circuit breaker inside a bounded
//! worker pool, and every outcome flows back through the bus into the
//! store.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod builder;
pub mod context;
pub mod control_plane;
pub mod error;

pub use builder::ControlPlaneBuilder;
pub use context::{Actor, RequestContext};
pub use control_plane::{CommandOutcome, ControlPlane, ControlPlaneConfig};
pub use error::{ControlPlaneError, Result};
