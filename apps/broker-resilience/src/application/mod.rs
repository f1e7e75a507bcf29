//! Application Layer
//!
//! - **Ports**: interfaces to the broker, the event bus and the market-data
//!   stream
//! - **Services**: buying-power verification and settlement monitoring

pub mod ports;
pub mod services;

pub use ports::*;
pub use services::*;
