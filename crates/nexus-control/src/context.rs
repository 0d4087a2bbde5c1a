//! Request context for control plane operations
//!
//! Carries who is making a request and the correlation ID that threads it
//! through logs and emitted events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context for a control plane request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID for tracing
    pub request_id: Uuid,
    /// Actor making the request (operator, service, etc.)
    pub actor: Actor,
    /// Request timestamp
    pub timestamp: DateTime<Utc>,
    /// Optional correlation ID for distributed tracing
    pub correlation_id: Option<String>,
}

/// Actor making a control plane request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Actor {
    /// Human operator
    User {
        /// User identifier
        user_id: String,
    },
    /// Service account (API server, DR job)
    Service {
        /// Service identifier
        service_id: String,
    },
    /// Internal system operation
    System {
        /// Component name
        component: String,
    },
    /// CLI tool
    Cli {
        /// Session identifier
        session_id: String,
    },
}

impl RequestContext {
    /// Create a new request context
    pub fn new(actor: Actor) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            actor,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Set a correlation ID for distributed tracing
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Create a system context for internal operations
    pub fn system(component: impl Into<String>) -> Self {
        Self::new(Actor::System {
            component: component.into(),
        })
    }

    /// Create a user context
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new(Actor::User {
            user_id: user_id.into(),
        })
    }

    /// Create a service context
    pub fn service(service_id: impl Into<String>) -> Self {
        Self::new(Actor::Service {
            service_id: service_id.into(),
        })
    }

    /// Create a CLI context
    pub fn cli(session_id: impl Into<String>) -> Self {
        Self::new(Actor::Cli {
            session_id: session_id.into(),
        })
    }

    /// Get the actor's identity string
    pub fn actor_id(&self) -> String {
        match &self.actor {
            Actor::User { user_id } => format!("user:{}", user_id),
            Actor::Service { service_id } => format!("service:{}", service_id),
            Actor::System { component } => format!("system:{}", component),
            Actor::Cli { session_id } => format!("cli:{}", session_id),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::system("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_ids() {
        assert_eq!(RequestContext::user("alice").actor_id(), "user:alice");
        assert_eq!(
            RequestContext::cli("session-9").actor_id(),
            "cli:session-9"
        );
        assert_eq!(
            RequestContext::system("federation").actor_id(),
            "system:federation"
        );
    }

    #[test]
    fn test_correlation_id() {
        let ctx = RequestContext::default().with_correlation_id("trace-123");
        assert_eq!(ctx.correlation_id, Some("trace-123".into()));
    }
}
