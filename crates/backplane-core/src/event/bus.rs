//! Broadcast event bus for distributing `ClientEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op, so the session publishes unconditionally.

use backplane_types::event::ClientEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for client lifecycle events.
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: ClientEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(ClientEvent::PollScheduled { delay_ms: 1000 });

        let received = rx.recv().await.unwrap();
        assert_eq!(received, ClientEvent::PollScheduled { delay_ms: 1000 });
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ClientEvent::WatchdogFired);

        assert_eq!(rx1.recv().await.unwrap(), ClientEvent::WatchdogFired);
        assert_eq!(rx2.recv().await.unwrap(), ClientEvent::WatchdogFired);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(ClientEvent::SchedulerStarted);
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn cloned_bus_shares_channel() {
        let bus = EventBus::new(16);
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        clone.publish(ClientEvent::CacheInvalidated);

        assert_eq!(rx.recv().await.unwrap(), ClientEvent::CacheInvalidated);
    }
}
