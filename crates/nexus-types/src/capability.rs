//! Capabilities - named, versioned commands exposed by provider adapters
//!
//! A capability set is fixed when its adapter is registered and immutable
//! for the lifetime of the plugin.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

/// A named, versioned command an adapter exposes (e.g. `restart`,
/// `healthcheck`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Command name, unique within one adapter.
    pub name: String,

    /// Capability contract version.
    pub version: Version,

    /// Human-readable description.
    pub description: Option<String>,
}

impl Capability {
    /// Create a capability with an explicit version.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: None,
        }
    }

    /// Create a capability at version 1.0.0.
    pub fn v1(name: impl Into<String>) -> Self {
        Self::new(name, Version::new(1, 0, 0))
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_display() {
        let cap = Capability::v1("restart");
        assert_eq!(cap.to_string(), "restart@1.0.0");
    }

    #[test]
    fn test_with_description() {
        let cap = Capability::v1("healthcheck").with_description("liveness probe");
        assert_eq!(cap.description.as_deref(), Some("liveness probe"));
    }
}
