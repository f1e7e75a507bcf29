//! Frame decoding for the Alpaca stock data stream.
//!
//! Every text frame is a JSON array of messages tagged by `"T"`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::application::ports::StreamError;
use crate::domain::{Quote, Symbol, TradeTick};
use crate::infrastructure::broker::alpaca::decimal_from_f64;

/// One decoded stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Control acknowledgement (`connected`, `authenticated`).
    Success(String),
    /// Server-side error.
    Error {
        /// Alpaca error code.
        code: i64,
        /// Error message.
        message: String,
    },
    /// Current subscription acknowledgement.
    Subscription {
        /// Quote symbols.
        quotes: Vec<String>,
        /// Trade symbols.
        trades: Vec<String>,
    },
    /// Quote update.
    Quote(Quote),
    /// Trade print.
    Trade(TradeTick),
    /// Anything else (bars, statuses, ...).
    Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "T")]
enum RawFrame {
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: i64,
        msg: String,
    },
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        quotes: Vec<String>,
        #[serde(default)]
        trades: Vec<String>,
    },
    #[serde(rename = "q")]
    Quote(RawQuote),
    #[serde(rename = "t")]
    Trade(RawTrade),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "bp", default)]
    bid_price: f64,
    #[serde(rename = "bs", default)]
    bid_size: f64,
    #[serde(rename = "ap", default)]
    ask_price: f64,
    #[serde(rename = "as", default)]
    ask_size: f64,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "p")]
    price: f64,
    #[serde(rename = "s", default)]
    size: f64,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

impl From<RawFrame> for StreamFrame {
    fn from(raw: RawFrame) -> Self {
        match raw {
            RawFrame::Success { msg } => Self::Success(msg),
            RawFrame::Error { code, msg } => Self::Error { code, message: msg },
            RawFrame::Subscription { quotes, trades } => Self::Subscription { quotes, trades },
            RawFrame::Quote(q) => Self::Quote(Quote {
                symbol: Symbol::new(&q.symbol),
                bid: decimal_from_f64(q.bid_price),
                ask: decimal_from_f64(q.ask_price),
                bid_size: decimal_from_f64(q.bid_size),
                ask_size: decimal_from_f64(q.ask_size),
                timestamp: q.timestamp,
            }),
            RawFrame::Trade(t) => Self::Trade(TradeTick {
                symbol: Symbol::new(&t.symbol),
                price: decimal_from_f64(t.price),
                size: decimal_from_f64(t.size),
                timestamp: t.timestamp,
            }),
            RawFrame::Other => Self::Ignored,
        }
    }
}

/// Decode one text frame into its messages.
pub fn decode_frame(text: &str) -> Result<Vec<StreamFrame>, StreamError> {
    let raw: Vec<RawFrame> = serde_json::from_str(text).map_err(|e| StreamError::Protocol {
        message: format!("invalid frame: {e}"),
    })?;
    Ok(raw.into_iter().map(StreamFrame::from).collect())
}

/// Auth request body.
#[must_use]
pub fn auth_message(key: &str, secret: &str) -> String {
    serde_json::json!({
        "action": "auth",
        "key": key,
        "secret": secret,
    })
    .to_string()
}

/// Subscribe request body for quotes and trades on `symbols`.
#[must_use]
pub fn subscribe_message(symbols: &[Symbol]) -> String {
    let symbols: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
    serde_json::json!({
        "action": "subscribe",
        "quotes": symbols,
        "trades": symbols,
    })
    .to_string()
}
