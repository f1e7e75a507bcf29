//! Alpaca broker adapter implementing `BrokerPort`.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::application::ports::{BrokerError, BrokerPort};
use crate::domain::{OrderId, OrderSnapshot, Quote, Symbol};

use super::api_types::{AlpacaAccountResponse, AlpacaLatestQuoteResponse, AlpacaOrderResponse};
use super::config::{AlpacaConfig, AlpacaEnvironment, AlpacaFeed};
use super::error::AlpacaError;
use super::http_client::AlpacaHttpClient;

/// Alpaca Markets broker adapter.
///
/// Read-only: account buying power, order status and latest quotes. Every
/// call is a single HTTP request; wrap the adapter in
/// [`ResilientBroker`](crate::infrastructure::broker::resilient::ResilientBroker)
/// for rate limiting and circuit breaking.
#[derive(Debug, Clone)]
pub struct AlpacaBrokerAdapter {
    client: AlpacaHttpClient,
    environment: AlpacaEnvironment,
    feed: AlpacaFeed,
}

impl AlpacaBrokerAdapter {
    /// Create a new Alpaca broker adapter.
    pub fn new(config: &AlpacaConfig) -> Result<Self, AlpacaError> {
        let client = AlpacaHttpClient::new(config)?;
        Ok(Self {
            client,
            environment: config.environment,
            feed: config.feed,
        })
    }

    /// Check if we're in live trading mode.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.environment.is_live()
    }
}

#[async_trait]
impl BrokerPort for AlpacaBrokerAdapter {
    async fn get_buying_power(&self) -> Result<Decimal, BrokerError> {
        let account: AlpacaAccountResponse = self.client.get("/v2/account").await?;
        Ok(account.buying_power()?)
    }

    async fn get_latest_quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError> {
        let path = format!(
            "/v2/stocks/{}/quotes/latest?feed={}",
            symbol.as_str(),
            self.feed.as_str()
        );
        let response: AlpacaLatestQuoteResponse = self.client.data_get(&path).await?;
        Ok(response.quote.to_quote(&response.symbol))
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<OrderSnapshot, BrokerError> {
        let path = format!("/v2/orders/{}", order_id.as_str());
        let response: AlpacaOrderResponse = self.client.get(&path).await?;
        Ok(response.to_snapshot()?)
    }
}
