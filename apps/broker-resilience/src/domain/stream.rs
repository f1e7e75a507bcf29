//! Market-data stream lifecycle state and subscription set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::identifiers::Symbol;

/// Connection state of the market-data stream.
///
/// ```text
/// DISCONNECTED → CONNECTING → CONNECTED → RECONNECTING → CONNECTED
///                                                      ↘ DISCONNECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    /// No connection and no connection loop.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and receiving messages.
    Connected,
    /// Connection lost; backing off between attempts.
    Reconnecting,
}

impl StreamState {
    /// Numeric encoding used for the state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
        };
        f.write_str(s)
    }
}

/// Symbols bound to a stream connection.
///
/// Sorted and de-duplicated, so two sets compare equal whenever they would
/// produce the same subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSubscriptionSet(BTreeSet<Symbol>);

impl StreamSubscriptionSet {
    /// Build a set from any symbol-like values; blanks are dropped.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            symbols
                .into_iter()
                .filter(|s| !s.as_ref().trim().is_empty())
                .map(Symbol::new)
                .collect(),
        )
    }

    /// Whether no symbols are subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `symbol` is subscribed.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.0.contains(symbol)
    }

    /// Iterate symbols in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.0.iter()
    }

    /// Symbols as a vector, sorted.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Symbol> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<Symbol> for StreamSubscriptionSet {
    fn from_iter<T: IntoIterator<Item = Symbol>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
