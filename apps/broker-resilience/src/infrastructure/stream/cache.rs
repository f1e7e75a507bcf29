//! Latest market data per symbol.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::{Quote, Symbol, TradeTick};

/// Latest quote and trade per symbol, fed by the stream consumer.
///
/// Out-of-order updates (older timestamp than the cached entry) are ignored.
#[derive(Debug, Default)]
pub struct MarketDataCache {
    quotes: RwLock<HashMap<Symbol, Quote>>,
    trades: RwLock<HashMap<Symbol, TradeTick>>,
}

impl MarketDataCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a quote. Returns `false` if a newer quote was already cached.
    pub fn update_quote(&self, quote: Quote) -> bool {
        let mut quotes = self.quotes.write();
        if let Some(existing) = quotes.get(&quote.symbol)
            && existing.timestamp > quote.timestamp
        {
            return false;
        }
        quotes.insert(quote.symbol.clone(), quote);
        true
    }

    /// Store a trade. Returns `false` if a newer trade was already cached.
    pub fn update_trade(&self, trade: TradeTick) -> bool {
        let mut trades = self.trades.write();
        if let Some(existing) = trades.get(&trade.symbol)
            && existing.timestamp > trade.timestamp
        {
            return false;
        }
        trades.insert(trade.symbol.clone(), trade);
        true
    }

    /// Latest quote for `symbol`.
    #[must_use]
    pub fn latest_quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.quotes.read().get(symbol).cloned()
    }

    /// Latest trade for `symbol`.
    #[must_use]
    pub fn latest_trade(&self, symbol: &Symbol) -> Option<TradeTick> {
        self.trades.read().get(symbol).cloned()
    }

    /// Every cached quote, sorted by symbol.
    #[must_use]
    pub fn quotes(&self) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self.quotes.read().values().cloned().collect();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        quotes
    }

    /// Number of symbols with a cached quote.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Whether no quotes are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.quotes.write().clear();
        self.trades.write().clear();
    }
}
