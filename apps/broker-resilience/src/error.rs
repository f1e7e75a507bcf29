//! Error taxonomy for the resilience layer.
//!
//! | Category | Type | Retried? |
//! |----------|------|----------|
//! | Bad arguments | [`ValidationError`] | Never, fails before any I/O |
//! | Network/timeout class | [`crate::BrokerError::Connection`], [`crate::BrokerError::Timeout`] | Per policy |
//! | Budget exhausted | [`RateLimitedError`] | Caller waits `retry_after` |
//! | Breaker rejection | [`CircuitOpenError`] | Caller defers or queues |
//!
//! A settlement timeout is not an error: it is encoded as a smaller settled set
//! in the bulk result.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::CircuitState;

/// Stable error codes used in logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid arguments or configuration.
    InvalidArgument,
    /// Transient provider failure (network, timeout, 5xx).
    ProviderUnavailable,
    /// Call budget exhausted or provider throttling.
    RateLimited,
    /// Circuit breaker rejected the call.
    CircuitOpen,
    /// Order not known to the broker.
    OrderNotFound,
    /// Credentials rejected.
    AuthenticationFailed,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    /// Get the reason string for this code.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::RateLimited => "RATE_LIMITED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether an operation failing with this code may succeed if retried later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable | Self::RateLimited | Self::CircuitOpen
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Invalid argument or configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    /// Name of the offending field or parameter.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error.
    #[must_use]
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    /// Error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidArgument
    }
}

/// A circuit breaker refused to run a call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error(
    "circuit '{name}' is {state} after {failure_count} consecutive failures, retry in {}ms",
    retry_after.map_or(0, |d| d.as_millis())
)]
pub struct CircuitOpenError {
    /// Breaker name (logical endpoint).
    pub name: String,
    /// State at the time of rejection.
    pub state: CircuitState,
    /// Consecutive failures that opened the breaker.
    pub failure_count: u32,
    /// Estimated time until the next probe is allowed. `None` when the breaker
    /// is half-open and only waiting for in-flight probes.
    pub retry_after: Option<Duration>,
}

impl CircuitOpenError {
    /// Error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::CircuitOpen
    }
}

/// A rate limiter refused a call; the caller must wait `retry_after`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("rate limit '{name}' exhausted, retry after {}ms", retry_after.as_millis())]
pub struct RateLimitedError {
    /// Limiter name (logical endpoint).
    pub name: String,
    /// Exact wait before a call is allowed again.
    pub retry_after: Duration,
}

impl RateLimitedError {
    /// Error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::RateLimited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::new("poll_interval", "must be positive");
        assert_eq!(err.to_string(), "invalid poll_interval: must be positive");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn circuit_open_error_carries_context() {
        let err = CircuitOpenError {
            name: "alpaca".to_string(),
            state: CircuitState::Open,
            failure_count: 5,
            retry_after: Some(Duration::from_millis(1500)),
        };
        let text = err.to_string();
        assert!(text.contains("alpaca"));
        assert!(text.contains("OPEN"));
        assert!(text.contains("1500ms"));
    }

    #[test]
    fn rate_limited_error_display() {
        let err = RateLimitedError {
            name: "alpaca".to_string(),
            retry_after: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("2000ms"));
        assert_eq!(err.code(), ErrorCode::RateLimited);
    }

    #[test]
    fn retryable_codes() {
        assert!(ErrorCode::RateLimited.is_retryable());
        assert!(ErrorCode::CircuitOpen.is_retryable());
        assert!(ErrorCode::ProviderUnavailable.is_retryable());
        assert!(!ErrorCode::InvalidArgument.is_retryable());
        assert!(!ErrorCode::OrderNotFound.is_retryable());
    }
}
