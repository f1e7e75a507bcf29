//! Market-Data Stream Infrastructure
//!
//! - [`StreamConnectionManager`]: connection lifecycle, breaker-gated
//!   reconnects, subscription changes, handler dispatch
//! - [`MarketDataCache`]: latest quote and trade per symbol
//! - [`AlpacaStreamConnector`]: Alpaca stock stream over websocket
//! - [`InMemoryConnector`]: scripted connector for tests and local runs

mod alpaca;
mod cache;
mod codec;
mod config;
mod manager;
mod memory;

pub use alpaca::AlpacaStreamConnector;
pub use cache::MarketDataCache;
pub use codec::{StreamFrame, decode_frame};
pub use config::StreamConfig;
pub use manager::{QuoteHandler, StreamConnectionManager, SubscriptionUpdate, TradeHandler};
pub use memory::{InMemoryConnector, InMemoryFeed};
