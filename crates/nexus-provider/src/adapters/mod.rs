//! Concrete provider adapters
//!
//! One module per backend family. All of them translate a capability name
//! plus JSON arguments into the backend's native operation and normalize
//! the answer into a JSON payload.

pub mod cloud;
pub mod docker;
pub mod scripted;
pub mod ssh;

pub use cloud::{CloudAdapter, CloudAdapterFactory};
pub use docker::{DockerAdapter, DockerAdapterFactory};
pub use scripted::{ScriptedAdapter, ScriptedAdapterFactory};
pub use ssh::{SshAdapter, SshAdapterFactory};
