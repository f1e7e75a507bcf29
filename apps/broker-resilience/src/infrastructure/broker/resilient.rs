//! Rate-limited, circuit-broken `BrokerPort` decorator.
//!
//! Every call first takes a slot from the [`RateLimiter`], then runs through
//! the [`CircuitBreaker`]. Only dependency failures (connection drops,
//! timeouts) count against the breaker; not-found and invalid-request
//! responses are answers from a healthy broker and leave it untouched.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::application::ports::{BrokerError, BrokerPort};
use crate::domain::{OrderId, OrderSnapshot, Quote, Symbol};
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, CircuitBreakerError, RateLimiter};

/// `BrokerPort` wrapped in a rate limiter and a circuit breaker.
#[derive(Clone)]
pub struct ResilientBroker {
    inner: Arc<dyn BrokerPort>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for ResilientBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientBroker")
            .field("limiter", &self.limiter.name())
            .field("breaker", &self.breaker.name())
            .finish_non_exhaustive()
    }
}

impl ResilientBroker {
    /// Wrap `inner` with shared protection primitives.
    #[must_use]
    pub fn new(
        inner: Arc<dyn BrokerPort>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            inner,
            limiter,
            breaker,
        }
    }

    /// Breaker guarding the wrapped broker.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Limiter guarding the wrapped broker.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, BrokerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        self.limiter.try_acquire()?;

        match self
            .breaker
            .call_classified(call, BrokerError::is_dependency_failure)
            .await
        {
            Ok(value) => {
                self.limiter.reset_errors();
                Ok(value)
            }
            Err(CircuitBreakerError::Open(err)) => {
                tracing::debug!(
                    operation,
                    name = %err.name,
                    "Broker call rejected by open circuit"
                );
                Err(BrokerError::CircuitOpen(err))
            }
            Err(CircuitBreakerError::Inner(BrokerError::RateLimited { retry_after })) => {
                metrics::record_provider_throttled(self.limiter.name());
                let backoff = self.limiter.record_error().max(retry_after);
                tracing::warn!(
                    operation,
                    retry_after_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "Broker throttled request"
                );
                Err(BrokerError::RateLimited {
                    retry_after: backoff,
                })
            }
            Err(CircuitBreakerError::Inner(err)) => Err(err),
        }
    }
}

#[async_trait]
impl BrokerPort for ResilientBroker {
    async fn get_buying_power(&self) -> Result<Decimal, BrokerError> {
        self.guarded("get_buying_power", || self.inner.get_buying_power())
            .await
    }

    async fn get_latest_quote(&self, symbol: &Symbol) -> Result<Quote, BrokerError> {
        self.guarded("get_latest_quote", || self.inner.get_latest_quote(symbol))
            .await
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<OrderSnapshot, BrokerError> {
        self.guarded("get_order", || self.inner.get_order(order_id))
            .await
    }
}
