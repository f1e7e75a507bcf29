//! Infrastructure Layer
//!
//! Adapters for the ports defined in the application layer:
//!
//! - `broker/`: Alpaca REST adapter, scripted mock, and the protecting wrapper
//! - `stream/`: market-data stream connectors, codec, cache and lifecycle manager
//! - `events/`: in-process domain event bus
//! - `config/`: environment settings and dependency wiring

pub mod broker;
pub mod config;
pub mod events;
pub mod stream;
