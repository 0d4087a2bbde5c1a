//! Nexus Provider - uniform adapters over concrete backends
//!
//! A [`ProviderAdapter`] hides one backend family (SSH host, Docker engine,
//! cloud API) behind the same capability-based interface, so the control
//! plane never branches on provider type. The [`PluginRegistry`] resolves a
//! node to its adapter, wrapped in the circuit breaker the registry owns
//! for that node.

#![deny(unsafe_code)]

pub mod adapter;
pub mod adapters;
pub mod error;
pub mod registry;

pub use adapter::{AdapterFactory, ProviderAdapter};
pub use adapters::{
    CloudAdapter, CloudAdapterFactory, DockerAdapter, DockerAdapterFactory, ScriptedAdapter,
    ScriptedAdapterFactory, SshAdapter, SshAdapterFactory,
};
pub use error::{ProviderError, RegistryError, Result};
pub use registry::{GuardedAdapter, PluginRegistry};
