//! Sliding-window call budget with exponential backoff on provider throttling.
//!
//! Two windows are tracked: the last 60 seconds and the last hour. A call is
//! allowed only when both windows are below their ceilings. Expired timestamps
//! are pruned lazily on every access.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use crate::error::{RateLimitedError, ValidationError};
use crate::observability::metrics;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Ceiling for the 60 second window.
    pub calls_per_minute: u32,
    /// Ceiling for the 3600 second window.
    pub calls_per_hour: u32,
    /// Base of the error backoff, in seconds.
    pub backoff_base: f64,
    /// Upper bound for the error backoff.
    pub backoff_cap: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: 200,
            calls_per_hour: 10_000,
            backoff_base: 2.0,
            backoff_cap: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    /// Check that the ceilings and backoff are usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.calls_per_minute == 0 {
            return Err(ValidationError::new("calls_per_minute", "must be at least 1"));
        }
        if self.calls_per_hour == 0 {
            return Err(ValidationError::new("calls_per_hour", "must be at least 1"));
        }
        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            return Err(ValidationError::new("backoff_base", "must be finite and >= 1.0"));
        }
        if self.backoff_cap.is_zero() {
            return Err(ValidationError::new("backoff_cap", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Result of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether a call may be made now.
    pub allowed: bool,
    /// Wait before a call becomes possible; zero when allowed.
    pub wait: Duration,
}

#[derive(Debug, Default)]
struct Windows {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
    consecutive_errors: u32,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        prune_window(&mut self.minute, now, MINUTE);
        prune_window(&mut self.hour, now, HOUR);
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
    while window
        .front()
        .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= length)
    {
        window.pop_front();
    }
}

fn window_wait(window: &VecDeque<Instant>, ceiling: u32, now: Instant, length: Duration) -> Duration {
    if window.len() < ceiling as usize {
        return Duration::ZERO;
    }
    // The window frees a slot once its oldest entry ages out.
    window.front().map_or(Duration::ZERO, |oldest| {
        length.saturating_sub(now.saturating_duration_since(*oldest))
    })
}

/// Call budget shared by every caller of one logical endpoint.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    /// Create a limiter on the system clock.
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Result<Self, ValidationError> {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self::from_validated(name, config, clock))
    }

    pub(super) fn from_validated(
        name: impl Into<String>,
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Limiter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Limiter configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Whether a call is allowed now, and how long to wait if not.
    #[must_use]
    pub fn check(&self) -> RateLimitDecision {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.prune(now);
        self.decide(&windows, now)
    }

    /// Record that a call was made.
    pub fn record_call(&self) {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.prune(now);
        windows.minute.push_back(now);
        windows.hour.push_back(now);
    }

    /// Check and record in one step.
    ///
    /// Concurrent callers cannot both take the last slot of a window.
    pub fn try_acquire(&self) -> Result<(), RateLimitedError> {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.prune(now);

        let decision = self.decide(&windows, now);
        if !decision.allowed {
            drop(windows);
            metrics::record_rate_limited(&self.name);
            tracing::debug!(
                name = %self.name,
                retry_after_ms = u64::try_from(decision.wait.as_millis()).unwrap_or(u64::MAX),
                "Rate limit budget exhausted"
            );
            return Err(RateLimitedError {
                name: self.name.clone(),
                retry_after: decision.wait,
            });
        }

        windows.minute.push_back(now);
        windows.hour.push_back(now);
        Ok(())
    }

    /// Record a provider rate-limit error and return the backoff to apply.
    ///
    /// The backoff is `min(base ^ consecutive_errors, cap)` seconds, counting
    /// this error.
    pub fn record_error(&self) -> Duration {
        let errors = {
            let mut windows = self.windows.lock();
            windows.consecutive_errors = windows.consecutive_errors.saturating_add(1);
            windows.consecutive_errors
        };

        let exponent = i32::try_from(errors).unwrap_or(i32::MAX);
        let seconds = self.config.backoff_base.powi(exponent);
        let cap = self.config.backoff_cap;
        let backoff = if seconds.is_finite() && seconds < cap.as_secs_f64() {
            Duration::from_secs_f64(seconds)
        } else {
            cap
        };

        tracing::warn!(
            name = %self.name,
            consecutive_errors = errors,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            "Provider rate limit hit"
        );
        backoff
    }

    /// Clear the consecutive error count after a successful call.
    pub fn reset_errors(&self) {
        self.windows.lock().consecutive_errors = 0;
    }

    /// Consecutive provider rate-limit errors since the last success.
    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.windows.lock().consecutive_errors
    }

    /// Calls recorded in the (minute, hour) windows.
    #[must_use]
    pub fn usage(&self) -> (usize, usize) {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.prune(now);
        (windows.minute.len(), windows.hour.len())
    }

    fn decide(&self, windows: &Windows, now: Instant) -> RateLimitDecision {
        let minute_wait = window_wait(&windows.minute, self.config.calls_per_minute, now, MINUTE);
        let hour_wait = window_wait(&windows.hour, self.config.calls_per_hour, now, HOUR);
        let minute_full = windows.minute.len() >= self.config.calls_per_minute as usize;
        let hour_full = windows.hour.len() >= self.config.calls_per_hour as usize;

        RateLimitDecision {
            allowed: !minute_full && !hour_full,
            wait: minute_wait.max(hour_wait),
        }
    }
}
