//! Market data delivered by quote lookups and the streaming connection.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identifiers::Symbol;

/// Best bid/ask for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol.
    pub symbol: Symbol,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Bid size.
    pub bid_size: Decimal,
    /// Ask size.
    pub ask_size: Decimal,
    /// Quote timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Get the mid price.
    #[must_use]
    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Price a buyer should expect to pay: the ask when quoted, else the bid.
    #[must_use]
    pub fn buy_price(&self) -> Option<Decimal> {
        if self.ask > Decimal::ZERO {
            Some(self.ask)
        } else if self.bid > Decimal::ZERO {
            Some(self.bid)
        } else {
            None
        }
    }
}

/// A last-sale print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTick {
    /// Symbol.
    pub symbol: Symbol,
    /// Trade price.
    pub price: Decimal,
    /// Trade size.
    pub size: Decimal,
    /// Trade timestamp.
    pub timestamp: DateTime<Utc>,
}

/// One decoded message from the market-data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketDataMessage {
    /// Quote update.
    Quote(Quote),
    /// Trade print.
    Trade(TradeTick),
}

impl MarketDataMessage {
    /// Symbol the message refers to.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Quote(q) => &q.symbol,
            Self::Trade(t) => &t.symbol,
        }
    }
}
