//! Buying Power Verifier
//!
//! Broker account state lags real settlement: proceeds of a filled sell can
//! take a while to show up as buying power. The verifier re-reads buying power
//! with jittered exponential backoff until it reaches the expected amount or
//! the read budget runs out.
//!
//! Running out of reads is a normal outcome (`available == false`), not an
//! error. Only a transport failure on the final read, or a rate-limit or
//! breaker rejection on any read, is returned as an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::ports::{BrokerError, BrokerPort};
use crate::domain::Symbol;
use crate::error::{ErrorCode, ValidationError};
use crate::observability::metrics;
use crate::resilience::{BackoffPolicy, RetrySchedule, RetryStep, Sleeper, TokioSleeper};

/// Verifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyingPowerConfig {
    /// Default number of buying-power reads.
    pub max_retries: u32,
    /// Wait before the second read; doubles for each further read.
    pub initial_wait: Duration,
    /// Ceiling for the un-jittered wait.
    pub max_wait: Duration,
    /// Jitter as a fraction of the wait.
    pub jitter: f64,
}

impl Default for BuyingPowerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_wait: Duration::from_millis(500),
            max_wait: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl BuyingPowerConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_retries == 0 {
            return Err(ValidationError::new("max_retries", "must be at least 1"));
        }
        if self.initial_wait.is_zero() {
            return Err(ValidationError::new("initial_wait", "must be greater than zero"));
        }
        if self.max_wait < self.initial_wait {
            return Err(ValidationError::new("max_wait", "must not be below initial_wait"));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ValidationError::new("jitter", "must be in [0.0, 1.0)"));
        }
        Ok(())
    }
}

/// Outcome of [`BuyingPowerVerifier::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyingPowerCheck {
    /// Whether `actual` reached `expected`.
    pub available: bool,
    /// Last buying power read.
    pub actual: Decimal,
    /// Amount that was required.
    pub expected: Decimal,
    /// Reads performed.
    pub attempts: u32,
}

/// Buying-power verification error.
#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    /// Bad arguments; no broker call was made.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Broker call failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The quote had neither a positive ask nor a positive bid.
    #[error("No usable price in latest quote for {symbol}")]
    NoPrice {
        /// Quoted symbol.
        symbol: Symbol,
    },
}

impl VerifyError {
    /// Error code for logs and events.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::InvalidArgument,
            Self::Broker(e) => e.code(),
            Self::NoPrice { .. } => ErrorCode::ProviderUnavailable,
        }
    }
}

/// Waits for broker buying power to reflect settled proceeds.
#[derive(Clone)]
pub struct BuyingPowerVerifier {
    broker: Arc<dyn BrokerPort>,
    sleeper: Arc<dyn Sleeper>,
    config: BuyingPowerConfig,
}

impl std::fmt::Debug for BuyingPowerVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuyingPowerVerifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BuyingPowerVerifier {
    /// Create a verifier that sleeps on the tokio timer.
    pub fn new(broker: Arc<dyn BrokerPort>, config: BuyingPowerConfig) -> Result<Self, ValidationError> {
        Self::with_sleeper(broker, config, Arc::new(TokioSleeper))
    }

    /// Create a verifier with a custom sleeper.
    pub fn with_sleeper(
        broker: Arc<dyn BrokerPort>,
        config: BuyingPowerConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            broker,
            sleeper,
            config,
        })
    }

    /// Verifier configuration.
    #[must_use]
    pub const fn config(&self) -> &BuyingPowerConfig {
        &self.config
    }

    /// Verify with the configured read budget and initial wait.
    pub async fn verify_default(&self, expected: Decimal) -> Result<BuyingPowerCheck, VerifyError> {
        self.verify(expected, self.config.max_retries, self.config.initial_wait)
            .await
    }

    /// Read buying power up to `max_retries` times until it reaches `expected`.
    ///
    /// The wait before read `k + 1` is `initial_wait * 2^k`, capped at the
    /// configured maximum and jittered. There is no wait after the last read.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::Validation`] if `expected <= 0`, `max_retries == 0` or
    ///   `initial_wait` is zero. Nothing is read.
    /// - [`VerifyError::Broker`] for a rate-limit or breaker rejection on any
    ///   read, a non-transient broker error, or any error on the final read.
    pub async fn verify(
        &self,
        expected: Decimal,
        max_retries: u32,
        initial_wait: Duration,
    ) -> Result<BuyingPowerCheck, VerifyError> {
        if expected <= Decimal::ZERO {
            return Err(ValidationError::new("expected", "must be positive").into());
        }
        if max_retries == 0 {
            return Err(ValidationError::new("max_retries", "must be at least 1").into());
        }
        if initial_wait.is_zero() {
            return Err(ValidationError::new("initial_wait", "must be greater than zero").into());
        }

        let policy = BackoffPolicy::new(
            initial_wait,
            self.config.max_wait.max(initial_wait),
            2.0,
            self.config.jitter,
            max_retries - 1,
        );
        let mut schedule = RetrySchedule::new(policy);
        let mut last_known = Decimal::ZERO;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let final_read = attempts >= max_retries;

            match self.broker.get_buying_power().await {
                Ok(actual) if actual >= expected => {
                    tracing::info!(%expected, %actual, attempts, "Buying power available");
                    metrics::record_buying_power_check(true, attempts);
                    return Ok(BuyingPowerCheck {
                        available: true,
                        actual,
                        expected,
                        attempts,
                    });
                }
                Ok(actual) => {
                    last_known = actual;
                    tracing::debug!(%expected, %actual, attempts, "Buying power below expected");
                }
                Err(e) if e.is_rejection() || final_read || !e.is_transient() => {
                    tracing::warn!(error = %e, code = %e.code(), attempts, "Buying power read failed");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempts, "Transient error reading buying power, retrying");
                }
            }

            match schedule.next(Instant::now()) {
                RetryStep::Retry { delay, attempt, .. } => {
                    tracing::debug!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Waiting before next buying power read"
                    );
                    self.sleeper.sleep(delay).await;
                }
                RetryStep::Exhausted { .. } => break,
            }
        }

        tracing::warn!(
            %expected,
            actual = %last_known,
            attempts,
            "Buying power still below expected after all reads"
        );
        metrics::record_buying_power_check(false, attempts);
        Ok(BuyingPowerCheck {
            available: false,
            actual: last_known,
            expected,
            attempts,
        })
    }

    /// Estimated cost of buying `qty` shares of `symbol`, with a safety buffer.
    ///
    /// `buffer_pct` is in percent points: `5` adds 5%. The price is the ask,
    /// or the bid when no ask is quoted.
    pub async fn estimate_order_cost(
        &self,
        symbol: &Symbol,
        qty: Decimal,
        buffer_pct: Decimal,
    ) -> Result<Decimal, VerifyError> {
        if qty <= Decimal::ZERO {
            return Err(ValidationError::new("qty", "must be positive").into());
        }
        if buffer_pct < Decimal::ZERO {
            return Err(ValidationError::new("buffer_pct", "must not be negative").into());
        }

        let quote = self.broker.get_latest_quote(symbol).await?;
        let price = quote.buy_price().ok_or_else(|| VerifyError::NoPrice {
            symbol: symbol.clone(),
        })?;

        let cost = price * qty * (Decimal::ONE + buffer_pct / Decimal::ONE_HUNDRED);
        tracing::debug!(%symbol, %qty, %price, %cost, "Estimated order cost");
        Ok(cost)
    }

    /// Pre-trade gate: estimate the cost, then verify it is affordable.
    pub async fn check_sufficient(
        &self,
        symbol: &Symbol,
        qty: Decimal,
        buffer_pct: Decimal,
    ) -> Result<bool, VerifyError> {
        let cost = self.estimate_order_cost(symbol, qty, buffer_pct).await?;
        let check = self.verify_default(cost).await?;
        if !check.available {
            tracing::warn!(
                %symbol,
                %qty,
                required = %cost,
                available = %check.actual,
                "Insufficient buying power for order"
            );
        }
        Ok(check.available)
    }
}
