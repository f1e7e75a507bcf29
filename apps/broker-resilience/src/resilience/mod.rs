//! Resilience patterns for external service calls.
//!
//! Circuit breakers, sliding-window rate limiting, and retry schedules, all
//! driven by injectable time sources so they can be tested without delays.

mod backoff;
mod circuit_breaker;
mod clock;
mod rate_limiter;
mod registry;

pub use backoff::{BackoffPolicy, RetrySchedule, RetryStep, apply_jitter};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats,
    CircuitState,
};
pub use clock::{Clock, ManualClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use rate_limiter::{RateLimitDecision, RateLimiter, RateLimiterConfig};
pub use registry::ResilienceRegistry;
