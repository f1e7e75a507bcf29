//! Circuit breaker for calls to a failing dependency.
//!
//! Prevents cascading failures when the broker (or any other dependency)
//! becomes unavailable or unresponsive.
//!
//! # State Machine
//!
//! ```text
//! CLOSED    → OPEN      (failure_threshold consecutive failures)
//! OPEN      → HALF_OPEN (timeout elapsed, evaluated lazily on read or call)
//! HALF_OPEN → CLOSED    (success_threshold consecutive successes)
//! HALF_OPEN → OPEN      (any failure)
//! ```
//!
//! A single mutex guards state and counters. The wrapped call runs outside the
//! lock: callers take a [`CallPermit`], run their I/O, then report the outcome
//! through the permit. A permit dropped without an outcome (for example when
//! the calling future is cancelled) gives its half-open probe slot back.
//!
//! # Example
//!
//! ```rust,ignore
//! use broker_resilience::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("alpaca", CircuitBreakerConfig::default())?;
//!
//! match breaker.call(|| client.get_account()).await {
//!     Ok(account) => { /* ... */ }
//!     Err(CircuitBreakerError::Open(rejected)) => { /* defer, retry after rejected.retry_after */ }
//!     Err(CircuitBreakerError::Inner(e)) => { /* the call itself failed */ }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::clock::{Clock, SystemClock};
use crate::error::{CircuitOpenError, ValidationError};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// A limited number of probe calls are let through.
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used for the state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `CLOSED` that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes in `HALF_OPEN` that close the circuit.
    pub success_threshold: u32,
    /// Time to stay `OPEN` before probing.
    pub timeout: Duration,
    /// Concurrent probe calls allowed in `HALF_OPEN`.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Configuration for the broker REST API.
    #[must_use]
    pub fn broker() -> Self {
        Self::default()
    }

    /// Configuration for the market-data stream.
    ///
    /// Opens sooner and probes sooner: a dead stream is cheap to retry and
    /// expensive to leave down.
    #[must_use]
    pub const fn market_data() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }

    /// Check that every threshold is usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.failure_threshold == 0 {
            return Err(ValidationError::new("failure_threshold", "must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ValidationError::new("success_threshold", "must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(ValidationError::new("timeout", "must be greater than zero"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ValidationError::new("half_open_max_calls", "must be at least 1"));
        }
        Ok(())
    }
}

/// Snapshot of a breaker's state and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted toward opening.
    pub consecutive_failures: u32,
    /// Consecutive successes counted toward closing.
    pub consecutive_successes: u32,
    /// Wall-clock time of the most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Lifetime failures.
    pub total_failures: u64,
    /// Lifetime successes.
    pub total_successes: u64,
    /// Lifetime rejected calls.
    pub total_rejections: u64,
    /// Lifetime state transitions.
    pub state_transitions: u64,
}

/// Error from [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call; the wrapped function never ran.
    #[error(transparent)]
    Open(CircuitOpenError),
    /// The wrapped function ran and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Neutral,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    // Bumped on every transition; outcomes from older generations only touch totals.
    generation: u64,
    last_failure_at: Option<DateTime<Utc>>,
    total_failures: u64,
    total_successes: u64,
    total_rejections: u64,
    state_transitions: u64,
}

impl BreakerInner {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_in_flight: 0,
            generation: 0,
            last_failure_at: None,
            total_failures: 0,
            total_successes: 0,
            total_rejections: 0,
            state_transitions: 0,
        }
    }
}

/// Three-state circuit breaker, shared per logical endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker on the system clock.
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, ValidationError> {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a breaker reading time from `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self::from_validated(name, config, clock))
    }

    pub(super) fn from_validated(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed);
        Self {
            name,
            config,
            clock,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying a due `OPEN → HALF_OPEN` transition first.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.check_half_open(&mut inner);
        inner.state
    }

    /// Whether a call would currently be let through. Does not reserve a slot.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.inner.lock();
        self.check_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.half_open_in_flight < self.config.half_open_max_calls,
        }
    }

    /// Time left before an `OPEN` breaker starts probing.
    #[must_use]
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        self.remaining_open(&inner)
    }

    /// Reserve the right to make one call.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let mut inner = self.inner.lock();
        self.check_half_open(&mut inner);

        let state = inner.state;
        let probe = match state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen if inner.half_open_in_flight < self.config.half_open_max_calls => {
                inner.half_open_in_flight += 1;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.total_rejections += 1;
                let rejection = CircuitOpenError {
                    name: self.name.clone(),
                    state,
                    failure_count: inner.consecutive_failures,
                    retry_after: self.remaining_open(&inner),
                };
                drop(inner);

                metrics::record_circuit_rejection(&self.name);
                tracing::debug!(
                    name = %self.name,
                    state = %rejection.state,
                    failure_count = rejection.failure_count,
                    "Circuit breaker rejected call"
                );
                return Err(rejection);
            }
        };

        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            probe,
            settled: false,
        })
    }

    /// Run `f` if permitted; every error counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(f, |_| true).await
    }

    /// Run `f` if permitted; errors for which `is_failure` returns false are
    /// neutral and leave the counters untouched.
    pub async fn call_classified<F, Fut, T, E, C>(
        &self,
        f: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let permit = self.try_acquire().map_err(CircuitBreakerError::Open)?;

        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                if is_failure(&error) {
                    permit.failure();
                } else {
                    permit.release();
                }
                Err(CircuitBreakerError::Inner(error))
            }
        }
    }

    /// Record a success observed outside a permit.
    pub fn record_success(&self) {
        let generation = self.inner.lock().generation;
        self.apply_outcome(generation, false, Outcome::Success);
    }

    /// Record a failure observed outside a permit.
    pub fn record_failure(&self) {
        let generation = self.inner.lock().generation;
        self.apply_outcome(generation, false, Outcome::Failure);
    }

    /// Operator override: close the circuit and clear consecutive counters.
    ///
    /// Lifetime totals are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        self.transition(&mut inner, CircuitState::Closed);
        drop(inner);

        tracing::warn!(name = %self.name, from = %previous, "Circuit breaker manually reset");
    }

    /// Operator override: open the circuit now.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Snapshot of state and counters.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        self.check_half_open(&mut inner);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_at: inner.last_failure_at,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejections: inner.total_rejections,
            state_transitions: inner.state_transitions,
        }
    }

    fn remaining_open(&self, inner: &BreakerInner) -> Option<Duration> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let opened_at = inner.opened_at?;
        let elapsed = self.clock.now().saturating_duration_since(opened_at);
        Some(self.config.timeout.saturating_sub(elapsed))
    }

    fn check_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(opened_at) = inner.opened_at
            && self.clock.now().saturating_duration_since(opened_at) >= self.config.timeout
        {
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn apply_outcome(&self, generation: u64, probe: bool, outcome: Outcome) {
        let mut inner = self.inner.lock();

        match outcome {
            Outcome::Success => inner.total_successes += 1,
            Outcome::Failure => {
                inner.total_failures += 1;
                inner.last_failure_at = Some(Utc::now());
            }
            Outcome::Neutral => {}
        }

        if generation != inner.generation {
            tracing::debug!(
                name = %self.name,
                ?outcome,
                "Ignoring outcome from a previous circuit generation"
            );
            return;
        }

        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match (inner.state, outcome) {
            (_, Outcome::Neutral) | (CircuitState::Open, _) => {}
            (CircuitState::Closed, Outcome::Success) => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
            }
            (CircuitState::Closed, Outcome::Failure) => {
                inner.consecutive_successes = 0;
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                self.transition(&mut inner, CircuitState::Open);
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.state_transitions += 1;
        inner.half_open_in_flight = 0;
        inner.consecutive_successes = 0;

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(self.clock.now());
                tracing::warn!(
                    name = %self.name,
                    from = %from,
                    to = %to,
                    consecutive_failures = inner.consecutive_failures,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(name = %self.name, from = %from, to = %to, "Circuit breaker testing");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                tracing::info!(name = %self.name, from = %from, to = %to, "Circuit breaker closed");
            }
        }

        metrics::record_circuit_state(&self.name, to);
    }
}

/// Right to make one call through a [`CircuitBreaker`].
///
/// Report the outcome with [`success`](Self::success),
/// [`failure`](Self::failure) or [`release`](Self::release). Dropping the
/// permit without reporting is the same as `release`.
#[derive(Debug)]
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this permit holds a half-open probe slot.
    #[must_use]
    pub const fn is_probe(&self) -> bool {
        self.probe
    }

    /// The call succeeded.
    pub fn success(mut self) {
        self.settle(Outcome::Success);
    }

    /// The call failed in a way that reflects on the dependency.
    pub fn failure(mut self) {
        self.settle(Outcome::Failure);
    }

    /// The call finished without saying anything about dependency health.
    pub fn release(mut self) {
        self.settle(Outcome::Neutral);
    }

    fn settle(&mut self, outcome: Outcome) {
        if !self.settled {
            self.settled = true;
            self.breaker
                .apply_outcome(self.generation, self.probe, outcome);
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        self.settle(Outcome::Neutral);
    }
}
