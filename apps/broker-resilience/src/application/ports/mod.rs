//! Application Ports (Driven)
//!
//! Ports define the interfaces the resilience services use to reach external
//! systems: the broker, the event bus, and the market-data stream.

mod broker_port;
mod event_publisher_port;
mod market_data_port;

pub use broker_port::{BrokerError, BrokerPort};
pub use event_publisher_port::{DomainEvent, EventPublishError, EventPublisherPort, NoOpEventPublisher};
pub use market_data_port::{MarketDataConnection, MarketDataConnector, StreamError};
