//! Alpaca-specific error types.

use std::time::Duration;

use thiserror::Error;

use crate::application::ports::BrokerError;

/// Errors from the Alpaca adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlpacaError {
    /// API returned an error status not covered below.
    #[error("API error: {status} {code} - {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Error code from the API.
        code: String,
        /// Error message from the API.
        message: String,
    },

    /// Server-side failure (5xx).
    #[error("Server error: {status} - {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Authentication failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Rate limited.
    #[error("Rate limited, retry after {retry_after_secs:?}s")]
    RateLimited {
        /// `Retry-After` header, when present.
        retry_after_secs: Option<u64>,
    },

    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonParse(String),

    /// Request rejected as invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Resource not found.
    #[error("Not found: {path}")]
    NotFound {
        /// Request path.
        path: String,
    },
}

impl From<AlpacaError> for BrokerError {
    fn from(err: AlpacaError) -> Self {
        match err {
            AlpacaError::Network(message) => Self::Connection { message },
            AlpacaError::Server { status, message } => Self::Connection {
                message: format!("{status}: {message}"),
            },
            AlpacaError::Timeout(message) => Self::Timeout { message },
            AlpacaError::RateLimited { retry_after_secs } => Self::RateLimited {
                retry_after: retry_after_secs.map_or(Duration::ZERO, Duration::from_secs),
            },
            AlpacaError::AuthenticationFailed => Self::Authentication {
                message: "credentials rejected".to_string(),
            },
            AlpacaError::NotFound { path } => Self::OrderNotFound {
                order_id: path.rsplit('/').next().unwrap_or_default().to_string(),
            },
            AlpacaError::InvalidRequest(message) => Self::InvalidRequest { message },
            AlpacaError::JsonParse(message) => Self::Unknown {
                message: format!("unparseable response: {message}"),
            },
            AlpacaError::Api {
                status,
                code,
                message,
            } => Self::Unknown {
                message: format!("{status} {code}: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_is_connection() {
        let broker_err: BrokerError = AlpacaError::Network("connection refused".to_string()).into();
        assert!(matches!(broker_err, BrokerError::Connection { .. }));
        assert!(broker_err.is_dependency_failure());
    }

    #[test]
    fn server_error_counts_as_dependency_failure() {
        let broker_err: BrokerError = AlpacaError::Server {
            status: 503,
            message: "unavailable".to_string(),
        }
        .into();
        assert!(broker_err.is_dependency_failure());
    }

    #[test]
    fn auth_is_not_transient() {
        let broker_err: BrokerError = AlpacaError::AuthenticationFailed.into();
        assert!(matches!(broker_err, BrokerError::Authentication { .. }));
        assert!(!broker_err.is_transient());
    }

    #[test]
    fn rate_limited_keeps_retry_after() {
        let broker_err: BrokerError = AlpacaError::RateLimited {
            retry_after_secs: Some(7),
        }
        .into();
        assert_eq!(broker_err.retry_after(), Some(Duration::from_secs(7)));

        let no_hint: BrokerError = AlpacaError::RateLimited {
            retry_after_secs: None,
        }
        .into();
        assert_eq!(no_hint.retry_after(), Some(Duration::ZERO));
    }

    #[test]
    fn not_found_extracts_order_id() {
        let broker_err: BrokerError = AlpacaError::NotFound {
            path: "/v2/orders/abc123".to_string(),
        }
        .into();
        assert_eq!(
            broker_err,
            BrokerError::OrderNotFound {
                order_id: "abc123".to_string()
            }
        );
    }
}
