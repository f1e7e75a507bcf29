// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Broker Resilience - Rust Core Library
//!
//! Resilience layer between the Cream trading system and its brokerage.
//!
//! # Architecture
//!
//! ## Layers (inside → outside)
//!
//! - **Resilience**: protection primitives shared by every broker call
//!   - `circuit_breaker`: CLOSED / OPEN / HALF_OPEN gate with call permits
//!   - `rate_limiter`: sliding minute and hour windows, error backoff
//!   - `backoff`: capped exponential delays with jitter, retry schedules
//!   - `registry`: one breaker and limiter per logical endpoint
//!
//! - **Domain**: identifiers, order snapshots, quotes and stream state
//!
//! - **Application**: ports and services
//!   - `ports`: `BrokerPort`, `EventPublisherPort`, `MarketDataConnector`
//!   - `services`: `BuyingPowerVerifier`, `SettlementMonitor`
//!
//! - **Infrastructure**: adapters
//!   - `broker`: Alpaca REST adapter and `ResilientBroker`
//!   - `stream`: `StreamConnectionManager` and Alpaca stream connector
//!   - `events`: broadcast event bus
//!   - `config`: settings and dependency container

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Error types shared across layers.
pub mod error;

/// Circuit breakers, rate limiters and backoff policies.
pub mod resilience;

/// Domain layer - identifiers and value objects with no I/O.
pub mod domain;

/// Application layer - ports and services.
pub mod application;

/// Infrastructure layer - adapters and wiring.
pub mod infrastructure;

/// Prometheus metrics.
pub mod observability;

/// Tracing subscriber setup.
pub mod telemetry;

pub use application::ports::{BrokerError, BrokerPort, DomainEvent, EventPublisherPort};
pub use application::services::{
    BulkSettlementResult, BuyingPowerCheck, BuyingPowerVerifier, SettlementMonitor,
};
pub use error::{CircuitOpenError, RateLimitedError, ValidationError};
pub use infrastructure::broker::ResilientBroker;
pub use infrastructure::config::{Container, ResilienceConfig};
pub use infrastructure::stream::StreamConnectionManager;
pub use resilience::{CircuitBreaker, CircuitState, RateLimiter, ResilienceRegistry};
