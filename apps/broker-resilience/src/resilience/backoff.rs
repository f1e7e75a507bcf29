//! Exponential backoff with jitter and an explicit retry state machine.
//!
//! [`BackoffPolicy`] is the pure delay function; [`RetrySchedule`] walks it one
//! attempt at a time and remembers when the next attempt is due. Every retry
//! loop in the crate goes through a schedule, so none of them is unbounded.
//!
//! ```rust
//! use broker_resilience::resilience::{BackoffPolicy, RetrySchedule, RetryStep};
//! use std::time::{Duration, Instant};
//!
//! let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 2.0, 0.0, 3);
//! let mut schedule = RetrySchedule::new(policy);
//!
//! let now = Instant::now();
//! assert!(matches!(schedule.next(now), RetryStep::Retry { delay, .. } if delay == Duration::from_millis(100)));
//! assert!(matches!(schedule.next(now), RetryStep::Retry { delay, .. } if delay == Duration::from_millis(200)));
//! assert!(matches!(schedule.next(now), RetryStep::Retry { delay, .. } if delay == Duration::from_millis(400)));
//! assert!(matches!(schedule.next(now), RetryStep::Exhausted { attempts: 3 }));
//! ```

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Ceiling for the un-jittered delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Maximum number of retries handed out by a schedule.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial,
            max,
            multiplier,
            jitter_factor,
            max_attempts,
        }
    }

    /// Check the parameters are usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.initial.is_zero() {
            return Err(ValidationError::new("initial", "must be greater than zero"));
        }
        if self.max < self.initial {
            return Err(ValidationError::new(
                "max",
                format!("{:?} is below initial {:?}", self.max, self.initial),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ValidationError::new("multiplier", "must be at least 1.0"));
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(ValidationError::new("jitter_factor", "must be in [0.0, 1.0)"));
        }
        if self.max_attempts == 0 {
            return Err(ValidationError::new("max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Un-jittered delay for a zero-based attempt: `initial * multiplier^attempt`,
    /// capped at `max`. Non-decreasing in `attempt`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial.as_micros() as f64 * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_micros() as f64 {
            return self.max;
        }
        Duration::from_micros(scaled as u64)
    }

    /// Delay for a zero-based attempt with ±`jitter_factor` applied.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        apply_jitter(self.base_delay(attempt), self.jitter_factor)
    }
}

/// Randomize `delay` uniformly within ±`factor`.
#[must_use]
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }

    let base = delay.as_secs_f64();
    let spread = base * factor;
    let jittered = rand::rng().random_range((base - spread)..=(base + spread));
    Duration::from_secs_f64(jittered.max(0.0))
}

/// Next action of a [`RetrySchedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Wait `delay`, then make attempt number `attempt` (1-based).
    Retry {
        /// Retry number, starting at 1.
        attempt: u32,
        /// Wait before the retry.
        delay: Duration,
        /// Instant at which the retry is due.
        deadline: Instant,
    },
    /// No retries left.
    Exhausted {
        /// Retries handed out before exhaustion.
        attempts: u32,
    },
}

/// Retry state machine over a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: BackoffPolicy,
    attempt: u32,
    next_deadline: Option<Instant>,
}

impl RetrySchedule {
    /// Create a schedule at attempt zero.
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            next_deadline: None,
        }
    }

    /// Advance the schedule.
    pub fn next(&mut self, now: Instant) -> RetryStep {
        if self.attempt >= self.policy.max_attempts {
            self.next_deadline = None;
            return RetryStep::Exhausted {
                attempts: self.attempt,
            };
        }

        let delay = self.policy.jittered_delay(self.attempt);
        let deadline = now + delay;
        self.attempt += 1;
        self.next_deadline = Some(deadline);

        RetryStep::Retry {
            attempt: self.attempt,
            delay,
            deadline,
        }
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Retries still available.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.policy.max_attempts.saturating_sub(self.attempt)
    }

    /// When the pending retry is due, if one is pending.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        self.next_deadline
    }

    /// The policy driving this schedule.
    #[must_use]
    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Start over after a success.
    pub const fn reset(&mut self) {
        self.attempt = 0;
        self.next_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_jitter(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            0.0,
            max_attempts,
        )
    }

    #[test]
    fn base_delay_sequence_caps() {
        let policy = no_jitter(10);
        let delays: Vec<_> = (0..6).map(|a| policy.base_delay(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = no_jitter(10);
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(1000),
            Duration::from_secs(10),
            2.0,
            0.1,
            5,
        );
        for _ in 0..200 {
            let d = policy.jittered_delay(0);
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn schedule_tracks_deadline_and_exhausts() {
        let mut schedule = RetrySchedule::new(no_jitter(2));
        let now = Instant::now();

        let first = schedule.next(now);
        assert_eq!(
            first,
            RetryStep::Retry {
                attempt: 1,
                delay: Duration::from_millis(100),
                deadline: now + Duration::from_millis(100),
            }
        );
        assert_eq!(schedule.next_deadline(), Some(now + Duration::from_millis(100)));
        assert_eq!(schedule.remaining(), 1);

        assert!(matches!(schedule.next(now), RetryStep::Retry { attempt: 2, .. }));
        assert_eq!(schedule.next(now), RetryStep::Exhausted { attempts: 2 });
        assert_eq!(schedule.next_deadline(), None);
    }

    #[test]
    fn schedule_reset() {
        let mut schedule = RetrySchedule::new(no_jitter(1));
        let _ = schedule.next(Instant::now());
        assert_eq!(schedule.remaining(), 0);

        schedule.reset();
        assert_eq!(schedule.attempt(), 0);
        assert_eq!(schedule.remaining(), 1);
    }

    #[test]
    fn validation_rejects_bad_policies() {
        assert!(no_jitter(3).validate().is_ok());

        let zero_initial = BackoffPolicy {
            initial: Duration::ZERO,
            ..no_jitter(3)
        };
        assert_eq!(zero_initial.validate().unwrap_err().field, "initial");

        let shrinking = BackoffPolicy {
            multiplier: 0.5,
            ..no_jitter(3)
        };
        assert_eq!(shrinking.validate().unwrap_err().field, "multiplier");

        let no_attempts = no_jitter(0);
        assert_eq!(no_attempts.validate().unwrap_err().field, "max_attempts");

        let wild_jitter = BackoffPolicy {
            jitter_factor: 1.5,
            ..no_jitter(3)
        };
        assert_eq!(wild_jitter.validate().unwrap_err().field, "jitter_factor");
    }

    proptest! {
        #[test]
        fn base_delay_non_decreasing_until_cap(
            initial_ms in 1u64..5_000,
            max_ms in 5_000u64..120_000,
            multiplier in 1.0f64..4.0,
        ) {
            let policy = BackoffPolicy::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
                0.0,
                32,
            );
            let mut previous = Duration::ZERO;
            for attempt in 0..32 {
                let delay = policy.base_delay(attempt);
                prop_assert!(delay >= previous);
                prop_assert!(delay <= policy.max);
                if previous == policy.max {
                    prop_assert_eq!(delay, policy.max);
                }
                previous = delay;
            }
        }
    }
}
