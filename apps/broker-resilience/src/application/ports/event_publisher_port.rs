//! Event Publisher Port (Driven Port)
//!
//! Fire-and-forget publishing of resilience-layer events. Delivery is
//! at-least-once from the publisher's point of view; consumers key on the
//! correlation ID.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::services::settlement::BulkSettlementResult;
use crate::domain::{CorrelationId, StreamState};

/// Event emitted by the resilience layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A settlement run finished (including empty and timed-out runs).
    SettlementCompleted(BulkSettlementResult),
    /// The market-data stream changed state.
    StreamStateChanged {
        /// Previous state.
        from: StreamState,
        /// New state.
        to: StreamState,
        /// When the transition happened.
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short event name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SettlementCompleted(_) => "settlement_completed",
            Self::StreamStateChanged { .. } => "stream_state_changed",
        }
    }

    /// Correlation ID, for events that belong to a workflow.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::SettlementCompleted(result) => Some(&result.correlation_id),
            Self::StreamStateChanged { .. } => None,
        }
    }
}

/// Event publishing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventPublishError {
    /// Connection error.
    #[error("Event publish connection error: {message}")]
    ConnectionError {
        /// Error details.
        message: String,
    },

    /// Serialization error.
    #[error("Event serialization error: {message}")]
    SerializationError {
        /// Error details.
        message: String,
    },

    /// Publishing failed.
    #[error("Event publish failed: {message}")]
    PublishFailed {
        /// Error details.
        message: String,
    },
}

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisherPort: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: DomainEvent) -> Result<(), EventPublishError>;

    /// Publish several events in order, stopping at the first failure.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<(), EventPublishError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// No-op event publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisherPort for NoOpEventPublisher {
    async fn publish(&self, _event: DomainEvent) -> Result<(), EventPublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_change() -> DomainEvent {
        DomainEvent::StreamStateChanged {
            from: StreamState::Connecting,
            to: StreamState::Connected,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn no_op_publisher_succeeds() {
        let publisher = NoOpEventPublisher;
        assert!(publisher.publish(state_change()).await.is_ok());
        assert!(publisher
            .publish_all(vec![state_change(), state_change()])
            .await
            .is_ok());
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(state_change()).unwrap();
        assert_eq!(json["type"], "stream_state_changed");
        assert_eq!(json["to"], "CONNECTED");
        assert_eq!(state_change().name(), "stream_state_changed");
        assert!(state_change().correlation_id().is_none());
    }
}
