//! In-process event bus on a tokio broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::ports::{DomainEvent, EventPublishError, EventPublisherPort};

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fire-and-forget event bus.
///
/// Publishing with no subscribers succeeds; the event is simply not
/// delivered. Subscribers that fall more than `capacity` events behind skip
/// the oldest ones.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventBus {
    /// Create a bus buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventPublisherPort for BroadcastEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<(), EventPublishError> {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::debug!(event = name, receivers, "Published event");
            }
            Err(_) => {
                tracing::debug!(event = name, "Published event with no subscribers");
            }
        }
        Ok(())
    }
}
