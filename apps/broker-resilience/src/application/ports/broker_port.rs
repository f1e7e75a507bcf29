//! Broker Port (Driven Port)
//!
//! The three broker reads the resilience layer depends on: account buying
//! power, latest quote, and order status.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{OrderId, OrderSnapshot, Quote, Symbol};
use crate::error::{CircuitOpenError, ErrorCode, RateLimitedError};

/// Broker port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Network failure or 5xx-class response.
    #[error("Broker connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Request timed out.
    #[error("Broker request timed out: {message}")]
    Timeout {
        /// Error details.
        message: String,
    },

    /// Call budget exhausted, locally or at the provider.
    #[error("Rate limited, retry after {}ms", retry_after.as_millis())]
    RateLimited {
        /// Wait before the next call. Zero when the provider gave no hint.
        retry_after: Duration,
    },

    /// Circuit breaker rejected the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Order not found.
    #[error("Order not found: {order_id}")]
    OrderNotFound {
        /// The missing order ID.
        order_id: String,
    },

    /// Request rejected as malformed.
    #[error("Invalid broker request: {message}")]
    InvalidRequest {
        /// Error details.
        message: String,
    },

    /// Credentials rejected.
    #[error("Broker authentication failed: {message}")]
    Authentication {
        /// Error details.
        message: String,
    },

    /// Unknown error.
    #[error("Broker error: {message}")]
    Unknown {
        /// Error details.
        message: String,
    },
}

impl BrokerError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Unknown { .. }
        )
    }

    /// Whether the error reflects on the health of the dependency and should
    /// count as a circuit breaker failure.
    #[must_use]
    pub const fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Whether this is a rate-limit or breaker rejection, which callers must
    /// see unchanged.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::CircuitOpen(_))
    }

    /// Suggested wait before retrying, if the error carries one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::CircuitOpen(rejection) => rejection.retry_after,
            _ => None,
        }
    }

    /// Error code for logs and events.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => ErrorCode::ProviderUnavailable,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::CircuitOpen(_) => ErrorCode::CircuitOpen,
            Self::OrderNotFound { .. } => ErrorCode::OrderNotFound,
            Self::InvalidRequest { .. } => ErrorCode::InvalidArgument,
            Self::Authentication { .. } => ErrorCode::AuthenticationFailed,
            Self::Unknown { .. } => ErrorCode::Internal,
        }
    }
}

impl From<RateLimitedError> for BrokerError {
    fn from(err: RateLimitedError) -> Self {
        Self::RateLimited {
            retry_after: err.retry_after,
        }
    }
}

/// Port for broker interactions.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Get account buying power.
    async fn get_buying_power(&self) -> Result<Decimal, BrokerError>;

    /// Get the latest quote for a symbol.
    async fn get_latest_quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError>;

    /// Get order status.
    async fn get_order(&self, order_id: &OrderId) -> Result<OrderSnapshot, BrokerError>;
}
