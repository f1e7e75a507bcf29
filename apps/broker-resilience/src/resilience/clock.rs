//! Injectable time sources.
//!
//! Breakers, limiters and retry loops read time through [`Clock`] and wait
//! through [`Sleeper`], so their policies can be exercised without real delays.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Monotonic time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock backed [`Clock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Total time advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Asynchronous, non-busy wait.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// [`Sleeper`] that returns immediately and records every requested wait.
///
/// When linked to a [`ManualClock`], each sleep advances that clock.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
    clock: Option<Arc<ManualClock>>,
}

impl RecordingSleeper {
    /// Create a sleeper that only records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sleeper that also advances `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            slept: Mutex::new(Vec::new()),
            clock: Some(clock),
        }
    }

    /// Every wait requested so far, in order.
    #[must_use]
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }

    /// Sum of all requested waits.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.slept.lock().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn recording_sleeper_records_and_advances() {
        let clock = Arc::new(ManualClock::new());
        let sleeper = RecordingSleeper::with_clock(Arc::clone(&clock));

        sleeper.sleep(Duration::from_millis(100)).await;
        sleeper.sleep(Duration::from_millis(250)).await;

        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(100), Duration::from_millis(250)]
        );
        assert_eq!(sleeper.total(), Duration::from_millis(350));
        assert_eq!(clock.elapsed(), Duration::from_millis(350));
    }
}
