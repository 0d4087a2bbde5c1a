//! Event bus implementation
//!
//! Built on a broadcast channel: publishing is non-blocking and fans out to
//! every live subscription. Each subscription owns an independent cursor
//! into the shared ring; a subscriber that lags past the ring capacity
//! loses its oldest undelivered events and observes the loss as a
//! `SubscriberOverflow` diagnostic rather than stalling the publisher.

use nexus_types::{ControllerId, EventSource, NexusEvent, NexusEventEnvelope};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::filter::EventFilter;

/// Default ring capacity per subscriber before overflow drops begin.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// In-process publish/subscribe bus for [`NexusEventEnvelope`]s.
pub struct EventBus {
    /// Sender side of the shared ring.
    tx: broadcast::Sender<NexusEventEnvelope>,

    /// Identity stamped onto bus-originated diagnostics.
    origin: ControllerId,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new(origin: ControllerId) -> Self {
        Self::with_capacity(origin, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with an explicit per-subscriber capacity bound.
    pub fn with_capacity(origin: ControllerId, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, origin }
    }

    /// Publish an envelope. Never blocks; an absence of subscribers is not
    /// an error.
    pub fn publish(&self, envelope: NexusEventEnvelope) {
        debug!(event_id = %envelope.id, kind = ?envelope.kind(), "Publishing event");
        let _ = self.tx.send(envelope);
    }

    /// Subscribe with a kind filter. `name` identifies the subscriber in
    /// overflow diagnostics.
    pub fn subscribe(&self, name: impl Into<String>, filter: EventFilter) -> Subscription {
        Subscription {
            name: name.into(),
            rx: self.tx.subscribe(),
            diagnostics: self.tx.clone(),
            origin: self.origin.clone(),
            filter,
        }
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self, name: impl Into<String>) -> Subscription {
        self.subscribe(name, EventFilter::all())
    }

    /// A sender handle for components that construct envelopes themselves.
    pub fn sender(&self) -> broadcast::Sender<NexusEventEnvelope> {
        self.tx.clone()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Controller identity this bus stamps on diagnostics.
    pub fn origin(&self) -> &ControllerId {
        &self.origin
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            origin: self.origin.clone(),
        }
    }
}

/// One subscriber's view of the bus.
///
/// Restartable: dropping a subscription and subscribing again yields a
/// fresh cursor starting at the current tail.
pub struct Subscription {
    name: String,
    rx: broadcast::Receiver<NexusEventEnvelope>,
    diagnostics: broadcast::Sender<NexusEventEnvelope>,
    origin: ControllerId,
    filter: EventFilter,
}

impl Subscription {
    /// Receive the next matching envelope.
    ///
    /// Returns `None` once the bus is gone. Lag is absorbed here: the
    /// dropped-event count is published as a `SubscriberOverflow`
    /// diagnostic and reception continues with the oldest retained event.
    pub async fn recv(&mut self) -> Option<NexusEventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if self.filter.matches(&envelope) {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        subscriber = %self.name,
                        dropped = n,
                        "Subscriber lagged, oldest undelivered events dropped"
                    );
                    let _ = self.diagnostics.send(NexusEventEnvelope::new(
                        NexusEvent::SubscriberOverflow {
                            subscriber: self.name.clone(),
                            dropped: n,
                        },
                        EventSource::Bus,
                        self.origin.clone(),
                    ));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(subscriber = %self.name, "Event bus closed");
                    return None;
                }
            }
        }
    }

    /// Non-blocking receive for callers polling from sync contexts.
    pub fn try_recv(&mut self) -> Option<NexusEventEnvelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if self.filter.matches(&envelope) {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(
                        subscriber = %self.name,
                        dropped = n,
                        "Subscriber lagged, oldest undelivered events dropped"
                    );
                    let _ = self.diagnostics.send(NexusEventEnvelope::new(
                        NexusEvent::SubscriberOverflow {
                            subscriber: self.name.clone(),
                            dropped: n,
                        },
                        EventSource::Bus,
                        self.origin.clone(),
                    ));
                }
                Err(_) => return None,
            }
        }
    }

    /// Subscriber name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_types::{EventKind, NodeId, NodeRecord, NodeStatus, ProviderKind};
    use tokio::time::{timeout, Duration};

    fn bus() -> EventBus {
        EventBus::new(ControllerId::new("ctl-test"))
    }

    fn discovery(id: &str) -> NexusEventEnvelope {
        NexusEventEnvelope::new(
            NexusEvent::NodeDiscovered {
                record: NodeRecord::new(NodeId::new(id), ProviderKind::Ssh, "admin@host"),
            },
            EventSource::ControlPlane,
            ControllerId::new("ctl-test"),
        )
    }

    fn status(id: &str) -> NexusEventEnvelope {
        NexusEventEnvelope::new(
            NexusEvent::StatusChanged {
                node_id: NodeId::new(id),
                status: NodeStatus::Healthy,
                base_version: 1,
            },
            EventSource::ControlPlane,
            ControllerId::new("ctl-test"),
        )
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = bus();
        let mut sub = bus.subscribe_all("test");

        bus.publish(discovery("n1"));

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("closed");
        assert_eq!(received.kind(), EventKind::NodeDiscovered);
    }

    #[tokio::test]
    async fn test_filter_skips_non_matching() {
        let bus = bus();
        let mut sub = bus.subscribe("test", EventFilter::only([EventKind::StatusChanged]));

        bus.publish(discovery("n1"));
        bus.publish(status("n1"));

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("closed");
        assert_eq!(received.kind(), EventKind::StatusChanged);
    }

    #[tokio::test]
    async fn test_publish_order_preserved() {
        let bus = bus();
        let mut sub = bus.subscribe_all("test");

        for i in 0..10 {
            bus.publish(discovery(&format!("n{}", i)));
        }

        for i in 0..10 {
            let received = sub.recv().await.expect("closed");
            match received.event {
                NexusEvent::NodeDiscovered { record } => {
                    assert_eq!(record.id, NodeId::new(format!("n{}", i)));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_overflows_without_blocking() {
        let bus = EventBus::with_capacity(ControllerId::new("ctl-test"), 4);
        let mut slow = bus.subscribe_all("slow");
        // Watcher subscribed after the flood only sees the diagnostic.
        let mut watcher =
            bus.subscribe("watcher", EventFilter::only([EventKind::SubscriberOverflow]));

        // Publisher is never blocked even though the ring holds 4.
        for i in 0..32 {
            bus.publish(discovery(&format!("n{}", i)));
        }

        // The slow subscriber observes a drop, then continues from the
        // retained tail.
        let first = slow.recv().await.expect("closed");
        assert_eq!(first.kind(), EventKind::NodeDiscovered);

        let diagnostic = timeout(Duration::from_millis(100), watcher.recv())
            .await
            .expect("timeout")
            .expect("closed");
        match diagnostic.event {
            NexusEvent::SubscriberOverflow { subscriber, dropped } => {
                assert_eq!(subscriber, "slow");
                assert!(dropped > 0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let bus = bus();
        assert_eq!(bus.subscriber_count(), 0);

        let _a = bus.subscribe_all("a");
        let _b = bus.subscribe_all("b");
        assert_eq!(bus.subscriber_count(), 2);
    }
}
