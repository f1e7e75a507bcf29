//! Alpaca adapter configuration.

use std::fmt;
use std::time::Duration;

/// Environment for Alpaca API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpacaEnvironment {
    /// Paper trading (simulated).
    Paper,
    /// Live trading (real money).
    Live,
}

impl AlpacaEnvironment {
    /// Get the base URL for the trading API.
    #[must_use]
    pub const fn trading_base_url(&self) -> &'static str {
        match self {
            Self::Paper => "https://paper-api.alpaca.markets",
            Self::Live => "https://api.alpaca.markets",
        }
    }

    /// Check if this is live trading.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Parse from an environment string (`paper` / `live`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" => Some(Self::Paper),
            "live" => Some(Self::Live),
            _ => None,
        }
    }
}

impl fmt::Display for AlpacaEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

/// Market data feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlpacaFeed {
    /// Free IEX feed.
    #[default]
    Iex,
    /// Consolidated SIP feed (paid).
    Sip,
}

impl AlpacaFeed {
    /// Feed name as used in URLs and query strings.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Iex => "iex",
            Self::Sip => "sip",
        }
    }

    /// Parse from a feed name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "iex" => Some(Self::Iex),
            "sip" => Some(Self::Sip),
            _ => None,
        }
    }
}

/// Data API host.
pub const DATA_BASE_URL: &str = "https://data.alpaca.markets";

/// Stock stream host.
pub const STREAM_BASE_URL: &str = "wss://stream.data.alpaca.markets";

/// Configuration for the Alpaca broker adapter.
#[derive(Clone)]
pub struct AlpacaConfig {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Trading environment.
    pub environment: AlpacaEnvironment,
    /// Market data feed.
    pub feed: AlpacaFeed,
    /// HTTP request timeout.
    pub timeout: Duration,
    trading_url_override: Option<String>,
    data_url_override: Option<String>,
    stream_url_override: Option<String>,
}

impl AlpacaConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(api_key: String, api_secret: String, environment: AlpacaEnvironment) -> Self {
        Self {
            api_key,
            api_secret,
            environment,
            feed: AlpacaFeed::default(),
            timeout: Duration::from_secs(30),
            trading_url_override: None,
            data_url_override: None,
            stream_url_override: None,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the market data feed.
    #[must_use]
    pub const fn with_feed(mut self, feed: AlpacaFeed) -> Self {
        self.feed = feed;
        self
    }

    /// Point both REST APIs at one host (used against local test servers).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.trading_url_override = Some(url.clone());
        self.data_url_override = Some(url);
        self
    }

    /// Override the stream URL.
    #[must_use]
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url_override = Some(url.into());
        self
    }

    /// Get the trading API base URL.
    #[must_use]
    pub fn trading_base_url(&self) -> &str {
        self.trading_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.trading_base_url())
    }

    /// Get the data API base URL.
    #[must_use]
    pub fn data_base_url(&self) -> &str {
        self.data_url_override.as_deref().unwrap_or(DATA_BASE_URL)
    }

    /// Full stock stream URL for the configured feed.
    #[must_use]
    pub fn stream_url(&self) -> String {
        self.stream_url_override
            .clone()
            .unwrap_or_else(|| format!("{STREAM_BASE_URL}/v2/{}", self.feed.as_str()))
    }
}

impl fmt::Debug for AlpacaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlpacaConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("feed", &self.feed)
            .field("timeout", &self.timeout)
            .field("trading_base_url", &self.trading_base_url())
            .field("data_base_url", &self.data_base_url())
            .finish()
    }
}
