//! Dependency Injection Container
//!
//! Wires the resilience primitives, broker adapters and services into one
//! graph. Every broker call made through the container shares the same
//! breaker and rate limiter.

use std::sync::Arc;

use crate::application::ports::{BrokerPort, EventPublisherPort, MarketDataConnector};
use crate::application::services::{BuyingPowerVerifier, SettlementMonitor};
use crate::error::ValidationError;
use crate::infrastructure::broker::{AlpacaBrokerAdapter, AlpacaError, ResilientBroker};
use crate::infrastructure::events::BroadcastEventBus;
use crate::infrastructure::stream::{AlpacaStreamConnector, StreamConnectionManager};
use crate::resilience::ResilienceRegistry;

use super::settings::ResilienceConfig;

/// Registry name of the broker REST endpoint.
pub const BROKER_ENDPOINT: &str = "broker";

/// Registry name of the market-data stream.
pub const MARKET_DATA_ENDPOINT: &str = "market_data";

/// Error building the container.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Broker adapter could not be created.
    #[error("broker adapter: {0}")]
    Broker(#[from] AlpacaError),
    /// A component rejected its configuration.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Dependency injection container.
#[derive(Debug, Clone)]
pub struct Container {
    registry: Arc<ResilienceRegistry>,
    broker: Arc<ResilientBroker>,
    events: Arc<BroadcastEventBus>,
    buying_power: Arc<BuyingPowerVerifier>,
    settlement: Arc<SettlementMonitor>,
    stream: Arc<StreamConnectionManager>,
}

impl Container {
    /// Build the production graph against Alpaca.
    pub fn from_config(config: &ResilienceConfig) -> Result<Self, ContainerError> {
        let adapter = AlpacaBrokerAdapter::new(&config.alpaca)?;
        tracing::info!(
            environment = %config.alpaca.environment,
            feed = config.alpaca.feed.as_str(),
            "Alpaca broker adapter created"
        );

        Self::with_ports(
            config,
            Arc::new(adapter),
            Arc::new(AlpacaStreamConnector::new(&config.alpaca)),
        )
    }

    /// Build the graph around arbitrary broker and stream adapters.
    pub fn with_ports(
        config: &ResilienceConfig,
        broker: Arc<dyn BrokerPort>,
        connector: Arc<dyn MarketDataConnector>,
    ) -> Result<Self, ContainerError> {
        let registry = Arc::new(ResilienceRegistry::new(
            config.breaker.clone(),
            config.rate_limiter.clone(),
        )?);

        let broker = Arc::new(ResilientBroker::new(
            broker,
            registry.rate_limiter(BROKER_ENDPOINT),
            registry.breaker(BROKER_ENDPOINT),
        ));
        let events = Arc::new(BroadcastEventBus::default());
        let publisher: Arc<dyn EventPublisherPort> = events.clone();

        let buying_power = Arc::new(BuyingPowerVerifier::new(
            broker.clone(),
            config.buying_power.clone(),
        )?);
        let settlement = Arc::new(SettlementMonitor::new(
            broker.clone(),
            Arc::clone(&publisher),
            config.settlement.clone(),
        )?);

        let stream_breaker =
            registry.register_breaker(MARKET_DATA_ENDPOINT, config.stream_breaker.clone())?;
        let stream = Arc::new(StreamConnectionManager::new(
            connector,
            stream_breaker,
            publisher,
            config.stream.clone(),
        )?);

        Ok(Self {
            registry,
            broker,
            events,
            buying_power,
            settlement,
            stream,
        })
    }

    /// Shared breakers and limiters.
    pub fn registry(&self) -> Arc<ResilienceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Protected broker port.
    pub fn broker(&self) -> Arc<ResilientBroker> {
        Arc::clone(&self.broker)
    }

    /// In-process event bus.
    pub fn events(&self) -> Arc<BroadcastEventBus> {
        Arc::clone(&self.events)
    }

    /// Buying-power verifier.
    pub fn buying_power(&self) -> Arc<BuyingPowerVerifier> {
        Arc::clone(&self.buying_power)
    }

    /// Settlement monitor.
    pub fn settlement(&self) -> Arc<SettlementMonitor> {
        Arc::clone(&self.settlement)
    }

    /// Market-data stream manager.
    pub fn stream(&self) -> Arc<StreamConnectionManager> {
        Arc::clone(&self.stream)
    }
}
