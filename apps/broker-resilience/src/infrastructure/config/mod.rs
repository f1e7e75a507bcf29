//! Configuration and Composition
//!
//! Environment-driven settings and the container that wires them.

pub mod container;
pub mod settings;

pub use container::{BROKER_ENDPOINT, Container, ContainerError, MARKET_DATA_ENDPOINT};
pub use settings::{ConfigError, ResilienceConfig, parse_symbol_list};
