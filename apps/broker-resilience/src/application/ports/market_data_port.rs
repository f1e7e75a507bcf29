//! Market Data Port (Driven Port)
//!
//! A connector opens one streaming connection bound to a fixed symbol set; the
//! stream manager owns its lifecycle. Changing symbols means opening a new
//! connection.

use async_trait::async_trait;

use crate::domain::{MarketDataMessage, Symbol};

/// Market-data stream error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Could not establish the connection.
    #[error("Stream connection failed: {message}")]
    Connect {
        /// Error details.
        message: String,
    },

    /// Credentials rejected by the stream.
    #[error("Stream authentication failed: {message}")]
    Authentication {
        /// Error details.
        message: String,
    },

    /// Unexpected or malformed frame.
    #[error("Stream protocol error: {message}")]
    Protocol {
        /// Error details.
        message: String,
    },

    /// The connection dropped.
    #[error("Stream connection lost: {message}")]
    Disconnected {
        /// Error details.
        message: String,
    },

    /// Handshake did not finish in time.
    #[error("Stream handshake timed out")]
    Timeout,
}

impl StreamError {
    /// Whether the failure should count against the stream's circuit breaker.
    ///
    /// Authentication failures are not: reconnecting will not fix them.
    #[must_use]
    pub const fn is_dependency_failure(&self) -> bool {
        !matches!(self, Self::Authentication { .. })
    }
}

/// Opens market-data connections.
#[async_trait]
pub trait MarketDataConnector: Send + Sync + std::fmt::Debug {
    /// Connect, authenticate, and subscribe quotes and trades for `symbols`.
    async fn connect(&self, symbols: &[Symbol]) -> Result<Box<dyn MarketDataConnection>, StreamError>;
}

/// One live market-data connection.
#[async_trait]
pub trait MarketDataConnection: Send {
    /// Next message. `Ok(None)` means the server closed the stream cleanly.
    async fn next_message(&mut self) -> Result<Option<MarketDataMessage>, StreamError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), StreamError>;
}
