//! Nexus Types - Core types for the controller coordination core
//!
//! Nexus is a home-infrastructure control plane: a single process that
//! discovers, monitors, and issues commands against a fleet of heterogeneous
//! backend providers (SSH hosts, Docker daemons, cloud APIs), keeps
//! authoritative state about them, and tolerates partial failure.
//!
//! ## Key Concepts
//!
//! - **NodeRecord**: Authoritative, versioned record of one managed target
//! - **Capability**: A named, versioned command a provider adapter supports
//! - **Events**: Immutable facts carried on the in-process bus; the state
//!   store is mutated only by consuming them
//! - **Federation**: Best-effort state exchange between sibling controllers

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod capability;
pub mod event;
pub mod ids;
pub mod node;

// Re-export main types
pub use capability::Capability;
pub use event::{EventKind, EventSeverity, EventSource, NexusEvent, NexusEventEnvelope};
pub use ids::{ControllerId, EventId, NodeId};
pub use node::{NodeRecord, NodeStatus, ProviderKind};
