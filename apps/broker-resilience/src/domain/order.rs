//! Order side, status and point-in-time snapshots returned by the broker.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identifiers::{OrderId, Symbol};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Parse a broker side string; anything other than `sell` is a buy.
    #[must_use]
    pub fn from_broker(side: &str) -> Self {
        if side.eq_ignore_ascii_case("sell") {
            Self::Sell
        } else {
            Self::Buy
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order status as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Received but not yet routed.
    New,
    /// Submitted, awaiting acknowledgement.
    PendingNew,
    /// Accepted by the venue.
    Accepted,
    /// Some quantity filled, remainder working.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancellation requested.
    PendingCancel,
    /// Canceled.
    Canceled,
    /// Expired (including done-for-day).
    Expired,
    /// Rejected by the broker or venue.
    Rejected,
}

impl OrderStatus {
    /// Parse an Alpaca order status string.
    #[must_use]
    pub fn from_broker(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "pending_new" | "accepted_for_bidding" => Self::PendingNew,
            "accepted" | "replaced" | "pending_replace" | "stopped" | "calculated" => {
                Self::Accepted
            }
            "partially_filled" => Self::PartiallyFilled,
            "filled" => Self::Filled,
            "pending_cancel" => Self::PendingCancel,
            "canceled" | "cancelled" => Self::Canceled,
            "expired" | "done_for_day" => Self::Expired,
            "rejected" | "suspended" => Self::Rejected,
            _ => Self::New,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::PendingNew => "PENDING_NEW",
            Self::Accepted => "ACCEPTED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::PendingCancel => "PENDING_CANCEL",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of an order, as returned by an order-status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Broker order ID.
    pub order_id: OrderId,
    /// Traded symbol.
    pub symbol: Symbol,
    /// Order side.
    pub side: OrderSide,
    /// Current status.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_qty: Decimal,
    /// Average fill price, if anything filled.
    pub filled_avg_price: Option<Decimal>,
}

impl OrderSnapshot {
    /// Notional value of the filled quantity (zero without a fill price).
    #[must_use]
    pub fn filled_notional(&self) -> Decimal {
        self.filled_avg_price
            .map_or(Decimal::ZERO, |price| self.filled_qty * price)
    }
}
