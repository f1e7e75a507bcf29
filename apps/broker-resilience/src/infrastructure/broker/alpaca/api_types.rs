//! Alpaca API response types.
//!
//! These types map directly to Alpaca's REST API format. The trading API
//! reports money and quantities as strings; the data API uses JSON numbers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;

use super::error::AlpacaError;
use crate::domain::{OrderId, OrderSide, OrderSnapshot, OrderStatus, Quote, Symbol};

// ============================================================================
// Order Types
// ============================================================================

/// Order response from Alpaca API (fields the resilience layer reads).
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaOrderResponse {
    /// Broker order ID.
    pub id: String,
    /// Symbol.
    pub symbol: String,
    /// Filled quantity (as string).
    pub filled_qty: String,
    /// Average fill price (as string).
    #[serde(default)]
    pub filled_avg_price: Option<String>,
    /// Order status.
    pub status: String,
    /// Order side.
    pub side: String,
}

impl AlpacaOrderResponse {
    /// Convert to a domain snapshot.
    pub fn to_snapshot(&self) -> Result<OrderSnapshot, AlpacaError> {
        Ok(OrderSnapshot {
            order_id: OrderId::new(&self.id),
            symbol: Symbol::new(&self.symbol),
            side: OrderSide::from_broker(&self.side),
            status: OrderStatus::from_broker(&self.status),
            filled_qty: parse_decimal("filled_qty", &self.filled_qty)?,
            filled_avg_price: self
                .filled_avg_price
                .as_deref()
                .map(|p| parse_decimal("filled_avg_price", p))
                .transpose()?,
        })
    }
}

// ============================================================================
// Account Types
// ============================================================================

/// Account response from Alpaca API.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaAccountResponse {
    /// Account ID.
    pub id: String,
    /// Buying power.
    pub buying_power: String,
    /// Cash balance.
    #[serde(default)]
    pub cash: Option<String>,
}

impl AlpacaAccountResponse {
    /// Parsed buying power.
    pub fn buying_power(&self) -> Result<Decimal, AlpacaError> {
        parse_decimal("buying_power", &self.buying_power)
    }
}

// ============================================================================
// Market Data Types
// ============================================================================

/// Latest quote response from the data API.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaLatestQuoteResponse {
    /// Symbol.
    pub symbol: String,
    /// Quote payload.
    pub quote: AlpacaQuote,
}

/// Quote payload, shared by the REST data API and the stream.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaQuote {
    /// Ask price.
    #[serde(rename = "ap", default)]
    pub ask_price: f64,
    /// Ask size.
    #[serde(rename = "as", default)]
    pub ask_size: f64,
    /// Bid price.
    #[serde(rename = "bp", default)]
    pub bid_price: f64,
    /// Bid size.
    #[serde(rename = "bs", default)]
    pub bid_size: f64,
    /// Quote timestamp.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
}

impl AlpacaQuote {
    /// Convert to a domain quote.
    #[must_use]
    pub fn to_quote(&self, symbol: &str) -> Quote {
        Quote {
            symbol: Symbol::new(symbol),
            bid: decimal_from_f64(self.bid_price),
            ask: decimal_from_f64(self.ask_price),
            bid_size: decimal_from_f64(self.bid_size),
            ask_size: decimal_from_f64(self.ask_size),
            timestamp: self.timestamp,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error response from Alpaca API.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaErrorResponse {
    /// Error code.
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    /// Error message.
    pub message: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, AlpacaError> {
    Decimal::from_str(raw.trim()).map_err(|e| AlpacaError::JsonParse(format!("{field}: {e}")))
}

/// Convert a JSON number to a decimal; non-finite values become zero.
#[must_use]
pub fn decimal_from_f64(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}
