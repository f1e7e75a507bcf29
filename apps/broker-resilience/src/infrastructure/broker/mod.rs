//! Broker Adapters
//!
//! Implementations of `BrokerPort`: the Alpaca REST adapter, the resilience
//! decorator that wraps it, and a scripted mock for tests.

pub mod alpaca;
pub mod mock;
pub mod resilient;

pub use alpaca::{AlpacaBrokerAdapter, AlpacaConfig, AlpacaEnvironment, AlpacaError, AlpacaFeed};
pub use mock::MockBroker;
pub use resilient::ResilientBroker;
