//! Event bus port: publish/subscribe for bridge events.

use std::future::Future;

use portbridge_domain::error::BridgeError;
use portbridge_domain::event::BridgeEvent;

/// Publishes bridge events to interested subscribers.
pub trait EventPublisher: Send + Sync + 'static {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: BridgeEvent) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

impl<T: EventPublisher> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: BridgeEvent) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).publish(event)
    }
}
