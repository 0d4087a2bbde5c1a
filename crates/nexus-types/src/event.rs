//! Event model for the controller
//!
//! Events are immutable facts: created by any component, published on the
//! bus, consumed by the state store and by subscribers. An envelope is
//! never mutated after publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ControllerId, EventId, NodeId};
use crate::node::{NodeRecord, NodeStatus};

/// Event envelope carried on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusEventEnvelope {
    /// Unique event ID
    pub id: EventId,

    /// Event timestamp; for federated deltas this is the original write
    /// time, used for last-writer-wins resolution
    pub timestamp: DateTime<Utc>,

    /// Controller that originated the fact
    pub origin: ControllerId,

    /// Component that published the event
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// Actor who triggered the event
    pub actor: Option<String>,

    /// The actual event
    pub event: NexusEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Control plane facade
    ControlPlane,
    /// State store
    State,
    /// Circuit breaker
    Breaker,
    /// Provider adapter / plugin registry
    Provider,
    /// Federation sync
    Federation,
    /// Event bus itself (diagnostics)
    Bus,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level event
    Debug,
    /// Informational event
    Info,
    /// Warning event
    Warning,
    /// Error event
    Error,
    /// Critical event requiring immediate attention
    Critical,
}

/// Discriminant of [`NexusEvent`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    NodeDiscovered,
    StatusChanged,
    CommandResult,
    CircuitOpened,
    CircuitClosed,
    FederationDelta,
    SubscriberOverflow,
}

/// Nexus events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NexusEvent {
    /// A node entered the fleet (or was re-announced with fresh metadata)
    NodeDiscovered {
        record: NodeRecord,
    },

    /// A node's observed health changed
    StatusChanged {
        node_id: NodeId,
        status: NodeStatus,
        /// Record version this mutation was derived from
        base_version: u64,
    },

    /// A capability invocation finished
    CommandResult {
        node_id: NodeId,
        capability: String,
        success: bool,
        output: Value,
        /// Record version this mutation was derived from
        base_version: u64,
    },

    /// A node's circuit breaker opened; calls fail fast until `retry_at`
    CircuitOpened {
        node_id: NodeId,
        retry_at: DateTime<Utc>,
    },

    /// A node's circuit breaker closed after a successful probe
    CircuitClosed {
        node_id: NodeId,
    },

    /// A record shipped from a peer controller during federation sync
    FederationDelta {
        record: NodeRecord,
    },

    /// A subscriber fell behind and its oldest undelivered events were
    /// dropped (diagnostic, non-fatal)
    SubscriberOverflow {
        subscriber: String,
        dropped: u64,
    },
}

impl NexusEvent {
    /// Discriminant for filtering.
    pub fn kind(&self) -> EventKind {
        match self {
            NexusEvent::NodeDiscovered { .. } => EventKind::NodeDiscovered,
            NexusEvent::StatusChanged { .. } => EventKind::StatusChanged,
            NexusEvent::CommandResult { .. } => EventKind::CommandResult,
            NexusEvent::CircuitOpened { .. } => EventKind::CircuitOpened,
            NexusEvent::CircuitClosed { .. } => EventKind::CircuitClosed,
            NexusEvent::FederationDelta { .. } => EventKind::FederationDelta,
            NexusEvent::SubscriberOverflow { .. } => EventKind::SubscriberOverflow,
        }
    }

    /// The node this event concerns, if any.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            NexusEvent::NodeDiscovered { record } | NexusEvent::FederationDelta { record } => {
                Some(&record.id)
            }
            NexusEvent::StatusChanged { node_id, .. }
            | NexusEvent::CommandResult { node_id, .. }
            | NexusEvent::CircuitOpened { node_id, .. }
            | NexusEvent::CircuitClosed { node_id } => Some(node_id),
            NexusEvent::SubscriberOverflow { .. } => None,
        }
    }
}

impl NexusEventEnvelope {
    /// Create a new event envelope stamped now.
    pub fn new(event: NexusEvent, source: EventSource, origin: ControllerId) -> Self {
        Self {
            id: EventId::generate(),
            timestamp: Utc::now(),
            origin,
            source,
            severity: Self::infer_severity(&event),
            correlation_id: None,
            actor: None,
            event,
        }
    }

    /// Create with an explicit timestamp (federated deltas carry the
    /// original write time).
    pub fn at(
        event: NexusEvent,
        source: EventSource,
        origin: ControllerId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut envelope = Self::new(event, source, origin);
        envelope.timestamp = timestamp;
        envelope
    }

    /// Create with correlation ID
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Create with actor
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Discriminant of the carried event.
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// Infer severity from event type
    fn infer_severity(event: &NexusEvent) -> EventSeverity {
        match event {
            NexusEvent::CircuitOpened { .. } | NexusEvent::SubscriberOverflow { .. } => {
                EventSeverity::Warning
            }

            NexusEvent::CommandResult { success: false, .. } => EventSeverity::Warning,

            NexusEvent::StatusChanged { status, .. }
                if *status == NodeStatus::Unreachable =>
            {
                EventSeverity::Warning
            }

            _ => EventSeverity::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ProviderKind;

    fn discovery_event() -> NexusEvent {
        NexusEvent::NodeDiscovered {
            record: NodeRecord::new(NodeId::new("n1"), ProviderKind::Ssh, "admin@host"),
        }
    }

    #[test]
    fn test_envelope_severity_inference() {
        let origin = ControllerId::new("ctl-a");

        let info = NexusEventEnvelope::new(discovery_event(), EventSource::ControlPlane, origin.clone());
        assert_eq!(info.severity, EventSeverity::Info);

        let warn = NexusEventEnvelope::new(
            NexusEvent::CircuitOpened {
                node_id: NodeId::new("n1"),
                retry_at: Utc::now(),
            },
            EventSource::Breaker,
            origin,
        );
        assert_eq!(warn.severity, EventSeverity::Warning);
    }

    #[test]
    fn test_event_kind_and_node_id() {
        let event = discovery_event();
        assert_eq!(event.kind(), EventKind::NodeDiscovered);
        assert_eq!(event.node_id(), Some(&NodeId::new("n1")));

        let overflow = NexusEvent::SubscriberOverflow {
            subscriber: "ws-push".into(),
            dropped: 8,
        };
        assert_eq!(overflow.node_id(), None);
    }

    #[test]
    fn test_explicit_timestamp() {
        let t = Utc::now() - chrono::Duration::seconds(90);
        let envelope = NexusEventEnvelope::at(
            discovery_event(),
            EventSource::Federation,
            ControllerId::new("ctl-b"),
            t,
        );
        assert_eq!(envelope.timestamp, t);
    }
}
