//! Subscription filters
//!
//! A filter selects which event kinds a subscription yields; everything
//! else is skipped without being delivered.

use std::collections::HashSet;

use nexus_types::{EventKind, NexusEventEnvelope};

/// Which event kinds a subscriber wants to see.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// `None` matches everything.
    kinds: Option<HashSet<EventKind>>,
}

impl EventFilter {
    /// Match every event.
    pub fn all() -> Self {
        Self { kinds: None }
    }

    /// Match only the given kinds.
    pub fn only<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = EventKind>,
    {
        Self {
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    /// Whether an envelope passes this filter.
    pub fn matches(&self, envelope: &NexusEventEnvelope) -> bool {
        match &self.kinds {
            None => true,
            Some(kinds) => kinds.contains(&envelope.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_types::{
        ControllerId, EventSource, NexusEvent, NexusEventEnvelope, NodeId, NodeStatus,
    };

    fn status_envelope() -> NexusEventEnvelope {
        NexusEventEnvelope::new(
            NexusEvent::StatusChanged {
                node_id: NodeId::new("n1"),
                status: NodeStatus::Healthy,
                base_version: 1,
            },
            EventSource::ControlPlane,
            ControllerId::new("ctl-a"),
        )
    }

    #[test]
    fn test_all_matches_everything() {
        assert!(EventFilter::all().matches(&status_envelope()));
    }

    #[test]
    fn test_only_filters_by_kind() {
        let filter = EventFilter::only([EventKind::CircuitOpened]);
        assert!(!filter.matches(&status_envelope()));

        let filter = EventFilter::only([EventKind::StatusChanged, EventKind::CircuitOpened]);
        assert!(filter.matches(&status_envelope()));
    }
}
