//! Alpaca Markets broker adapter.
//!
//! `BrokerPort` over the Alpaca trading and market data REST APIs:
//! - Account buying power
//! - Order status polling
//! - Latest quotes
//!
//! Environment-aware (PAPER vs LIVE). Retries are left to the resilience layer.

mod adapter;
mod api_types;
mod config;
mod error;
mod http_client;

pub use adapter::AlpacaBrokerAdapter;
pub use api_types::{AlpacaQuote, decimal_from_f64};
pub use config::{AlpacaConfig, AlpacaEnvironment, AlpacaFeed};
pub use error::AlpacaError;
