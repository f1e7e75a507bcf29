//! Scripted mock broker for testing.
//!
//! Each endpoint replays a queue of canned responses. The last response of a
//! queue is sticky: once the script runs out, it keeps being returned.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::{BrokerError, BrokerPort};
use crate::domain::{OrderId, OrderSide, OrderSnapshot, OrderStatus, Quote, Symbol};

type Script<T> = VecDeque<Result<T, BrokerError>>;

fn next_scripted<T: Clone>(script: &mut Script<T>) -> Option<Result<T, BrokerError>> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

/// Mock broker for testing.
#[derive(Debug, Default)]
pub struct MockBroker {
    buying_power: Mutex<Script<Decimal>>,
    quotes: Mutex<HashMap<Symbol, Result<Quote, BrokerError>>>,
    orders: Mutex<HashMap<OrderId, Script<OrderSnapshot>>>,
    order_polls: Mutex<HashMap<OrderId, u32>>,
    buying_power_calls: AtomicU32,
    latency: Mutex<Option<Duration>>,
}

impl MockBroker {
    /// Create a new mock broker with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script successive buying-power reads.
    #[must_use]
    pub fn with_buying_power<I>(self, reads: I) -> Self
    where
        I: IntoIterator<Item = Decimal>,
    {
        self.buying_power.lock().extend(reads.into_iter().map(Ok));
        self
    }

    /// Append one buying-power response (value or error).
    pub fn push_buying_power(&self, response: Result<Decimal, BrokerError>) {
        self.buying_power.lock().push_back(response);
    }

    /// Set the latest quote for a symbol.
    pub fn set_quote(&self, quote: Quote) {
        self.quotes.lock().insert(quote.symbol.clone(), Ok(quote));
    }

    /// Make quote lookups for `symbol` fail.
    pub fn set_quote_error(&self, symbol: &Symbol, error: BrokerError) {
        self.quotes.lock().insert(symbol.clone(), Err(error));
    }

    /// Script successive status polls for one order.
    pub fn script_order<I>(&self, order_id: &OrderId, responses: I)
    where
        I: IntoIterator<Item = Result<OrderSnapshot, BrokerError>>,
    {
        self.orders
            .lock()
            .entry(order_id.clone())
            .or_default()
            .extend(responses);
    }

    /// Delay every call by `latency` (tokio time).
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Buying-power reads made so far.
    #[must_use]
    pub fn buying_power_calls(&self) -> u32 {
        self.buying_power_calls.load(Ordering::SeqCst)
    }

    /// Status polls made for `order_id` so far.
    #[must_use]
    pub fn order_polls(&self, order_id: &OrderId) -> u32 {
        self.order_polls.lock().get(order_id).copied().unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BrokerPort for MockBroker {
    async fn get_buying_power(&self) -> Result<Decimal, BrokerError> {
        self.buying_power_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        next_scripted(&mut self.buying_power.lock()).unwrap_or_else(|| {
            Err(BrokerError::Unknown {
                message: "no buying power scripted".to_string(),
            })
        })
    }

    async fn get_latest_quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError> {
        self.simulate_latency().await;

        self.quotes.lock().get(symbol).cloned().unwrap_or_else(|| {
            Err(BrokerError::InvalidRequest {
                message: format!("no quote for {symbol}"),
            })
        })
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<OrderSnapshot, BrokerError> {
        *self.order_polls.lock().entry(order_id.clone()).or_insert(0) += 1;
        self.simulate_latency().await;

        self.orders
            .lock()
            .get_mut(order_id)
            .and_then(next_scripted)
            .unwrap_or_else(|| {
                Err(BrokerError::OrderNotFound {
                    order_id: order_id.to_string(),
                })
            })
    }
}

/// Build an order snapshot for scripting.
#[must_use]
pub fn order_snapshot(
    order_id: &str,
    symbol: &str,
    status: OrderStatus,
    filled_qty: Decimal,
    filled_avg_price: Option<Decimal>,
) -> OrderSnapshot {
    OrderSnapshot {
        order_id: OrderId::new(order_id),
        symbol: Symbol::new(symbol),
        side: OrderSide::Sell,
        status,
        filled_qty,
        filled_avg_price,
    }
}

/// Build a quote for scripting.
#[must_use]
pub fn quote(symbol: &str, bid: Decimal, ask: Decimal) -> Quote {
    Quote {
        symbol: Symbol::new(symbol),
        bid,
        ask,
        bid_size: Decimal::ONE_HUNDRED,
        ask_size: Decimal::ONE_HUNDRED,
        timestamp: Utc::now(),
    }
}
