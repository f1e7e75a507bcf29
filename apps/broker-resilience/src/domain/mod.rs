//! Domain Layer
//!
//! Value types shared by every resilience component. Nothing in here performs
//! I/O or knows about the broker transport.
//!
//! - `identifiers`: order, symbol and correlation identifiers
//! - `order`: order side, broker order status and status snapshots
//! - `market`: quotes and trades delivered by the market-data stream
//! - `stream`: stream connection state and subscription set

pub mod identifiers;
pub mod market;
pub mod order;
pub mod stream;

pub use identifiers::{CorrelationId, OrderId, Symbol};
pub use market::{MarketDataMessage, Quote, TradeTick};
pub use order::{OrderSide, OrderSnapshot, OrderStatus};
pub use stream::{StreamState, StreamSubscriptionSet};
