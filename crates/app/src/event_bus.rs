//! In-process event bus backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use portbridge_domain::error::BridgeError;
use portbridge_domain::event::BridgeEvent;

use crate::ports::EventPublisher;

/// In-process event bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the event is simply dropped).
pub struct InProcessEventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl InProcessEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events on this bus.
    ///
    /// Returns a receiver that will get all events published *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, event: BridgeEvent) -> impl Future<Output = Result<(), BridgeError>> + Send {
        if self.sender.send(event).is_err() {
            tracing::trace!("no subscribers for bridge event");
        }
        async { Ok(()) }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use portbridge_domain::event::EventKind;
    use portbridge_domain::id::DeviceId;

    fn status_event() -> BridgeEvent {
        BridgeEvent::new(EventKind::DeviceStatus {
            device_id: DeviceId::new(),
            online: true,
            last_seen: None,
        })
    }

    #[tokio::test]
    async fn should_deliver_event_to_subscriber() {
        let bus = InProcessEventBus::new(16);
        let mut rx = bus.subscribe();

        let event = status_event();
        let event_id = event.id;

        bus.publish(event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, event_id);
    }

    #[tokio::test]
    async fn should_deliver_event_to_multiple_subscribers() {
        let bus = InProcessEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = BridgeEvent::new(EventKind::HubStatus {
            connected: true,
            authenticated: false,
        });
        let event_id = event.id;

        bus.publish(event).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap().id, event_id);
        assert_eq!(rx2.recv().await.unwrap().id, event_id);
    }

    #[tokio::test]
    async fn should_succeed_when_no_subscribers() {
        let bus = InProcessEventBus::new(16);
        assert!(bus.publish(status_event()).await.is_ok());
    }

    #[tokio::test]
    async fn should_not_deliver_events_published_before_subscribe() {
        let bus = InProcessEventBus::new(16);
        bus.publish(status_event()).await.unwrap();

        let mut rx = bus.subscribe();
        let later = status_event();
        let later_id = later.id;
        bus.publish(later).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().id, later_id);
    }
}
