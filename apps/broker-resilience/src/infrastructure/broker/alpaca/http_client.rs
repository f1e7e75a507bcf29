//! HTTP client wrapper for the Alpaca REST APIs.
//!
//! The client makes exactly one attempt per call. Retry and backoff decisions
//! belong to the resilience layer wrapped around the adapter.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::api_types::AlpacaErrorResponse;
use super::config::AlpacaConfig;
use super::error::AlpacaError;

/// HTTP client for Alpaca API.
#[derive(Clone)]
pub struct AlpacaHttpClient {
    client: Client,
    api_key: String,
    api_secret: String,
    trading_base_url: String,
    data_base_url: String,
}

impl std::fmt::Debug for AlpacaHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaHttpClient")
            .field("trading_base_url", &self.trading_base_url)
            .field("data_base_url", &self.data_base_url)
            .finish_non_exhaustive()
    }
}

impl AlpacaHttpClient {
    /// Create a new HTTP client from config.
    pub fn new(config: &AlpacaConfig) -> Result<Self, AlpacaError> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(AlpacaError::AuthenticationFailed);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AlpacaError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            trading_base_url: config.trading_base_url().trim_end_matches('/').to_string(),
            data_base_url: config.data_base_url().trim_end_matches('/').to_string(),
        })
    }

    /// Make a GET request to the trading API.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AlpacaError> {
        self.get_from(&self.trading_base_url, path).await
    }

    /// Make a GET request to the data API.
    pub async fn data_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AlpacaError> {
        self.get_from(&self.data_base_url, path).await
    }

    async fn get_from<T: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
    ) -> Result<T, AlpacaError> {
        let url = format!("{base_url}{path}");

        let response = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AlpacaError::Timeout(e.to_string())
                } else {
                    AlpacaError::Network(e.to_string())
                }
            })?;

        if response.status().is_success() {
            let text = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    AlpacaError::Timeout(e.to_string())
                } else {
                    AlpacaError::Network(e.to_string())
                }
            })?;
            return serde_json::from_str(&text).map_err(|e| AlpacaError::JsonParse(e.to_string()));
        }

        Err(error_from_response(response, path).await)
    }
}

async fn error_from_response(response: Response, path: &str) -> AlpacaError {
    let status = response.status();
    let retry_after_secs = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<AlpacaErrorResponse>(&body) {
        Ok(err) => (
            err.code
                .map_or_else(|| status.as_u16().to_string(), |c| c.to_string()),
            err.message,
        ),
        Err(_) => (status.as_u16().to_string(), body),
    };

    tracing::debug!(
        status = status.as_u16(),
        code = %code,
        path,
        "Alpaca request failed"
    );

    categorize_status(status, path, code, message, retry_after_secs)
}

/// Map an HTTP error status to an adapter error.
fn categorize_status(
    status: StatusCode,
    path: &str,
    code: String,
    message: String,
    retry_after_secs: Option<u64>,
) -> AlpacaError {
    match status.as_u16() {
        429 => AlpacaError::RateLimited { retry_after_secs },
        408 | 504 => AlpacaError::Timeout(message),
        500..=599 => AlpacaError::Server {
            status: status.as_u16(),
            message,
        },
        401 | 403 => AlpacaError::AuthenticationFailed,
        404 => AlpacaError::NotFound {
            path: path.to_string(),
        },
        400 | 422 => AlpacaError::InvalidRequest(message),
        other => AlpacaError::Api {
            status: other,
            code,
            message,
        },
    }
}
