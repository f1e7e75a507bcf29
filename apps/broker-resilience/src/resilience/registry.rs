//! Explicit registry of shared breakers and limiters.
//!
//! Owned by the composition root and passed to every call site, so all callers
//! of one logical endpoint share one breaker and one limiter.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use super::clock::{Clock, SystemClock};
use super::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::error::ValidationError;

/// Named breakers and limiters, created on first use.
#[derive(Debug)]
pub struct ResilienceRegistry {
    breaker_defaults: CircuitBreakerConfig,
    limiter_defaults: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl ResilienceRegistry {
    /// Create a registry whose lazily created entries use the given defaults.
    pub fn new(
        breaker_defaults: CircuitBreakerConfig,
        limiter_defaults: RateLimiterConfig,
    ) -> Result<Self, ValidationError> {
        Self::with_clock(breaker_defaults, limiter_defaults, Arc::new(SystemClock))
    }

    /// Create a registry whose entries read time from `clock`.
    pub fn with_clock(
        breaker_defaults: CircuitBreakerConfig,
        limiter_defaults: RateLimiterConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ValidationError> {
        breaker_defaults.validate()?;
        limiter_defaults.validate()?;
        Ok(Self {
            breaker_defaults,
            limiter_defaults,
            clock,
            breakers: RwLock::new(HashMap::new()),
            limiters: RwLock::new(HashMap::new()),
        })
    }

    /// Shared breaker for `name`, created with the default config if absent.
    #[must_use]
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(name, "Creating circuit breaker");
            Arc::new(self.build_breaker(name, self.breaker_defaults.clone()))
        });
        Arc::clone(breaker)
    }

    /// Shared limiter for `name`, created with the default config if absent.
    #[must_use]
    pub fn rate_limiter(&self, name: &str) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.read().get(name) {
            return Arc::clone(limiter);
        }

        let mut limiters = self.limiters.write();
        let limiter = limiters.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(name, "Creating rate limiter");
            Arc::new(self.build_limiter(name, self.limiter_defaults.clone()))
        });
        Arc::clone(limiter)
    }

    /// Register a breaker with a custom config, replacing any existing entry.
    pub fn register_breaker(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ValidationError> {
        let breaker = Arc::new(CircuitBreaker::with_clock(name, config, Arc::clone(&self.clock))?);
        self.breakers
            .write()
            .insert(name.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Register a limiter with a custom config, replacing any existing entry.
    pub fn register_rate_limiter(
        &self,
        name: &str,
        config: RateLimiterConfig,
    ) -> Result<Arc<RateLimiter>, ValidationError> {
        let limiter = Arc::new(RateLimiter::with_clock(name, config, Arc::clone(&self.clock))?);
        self.limiters
            .write()
            .insert(name.to_string(), Arc::clone(&limiter));
        Ok(limiter)
    }

    /// Stats of every registered breaker, sorted by name.
    #[must_use]
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Reset every registered breaker.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    fn build_breaker(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::from_validated(name, config, Arc::clone(&self.clock))
    }

    fn build_limiter(&self, name: &str, config: RateLimiterConfig) -> RateLimiter {
        RateLimiter::from_validated(name, config, Arc::clone(&self.clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;

    fn registry() -> ResilienceRegistry {
        ResilienceRegistry::new(CircuitBreakerConfig::default(), RateLimiterConfig::default()).unwrap()
    }

    #[test]
    fn same_name_shares_instance() {
        let registry = registry();
        let a = registry.breaker("alpaca");
        let b = registry.breaker("alpaca");
        assert!(Arc::ptr_eq(&a, &b));

        let l1 = registry.rate_limiter("alpaca");
        let l2 = registry.rate_limiter("alpaca");
        assert!(Arc::ptr_eq(&l1, &l2));
    }

    #[test]
    fn different_names_are_isolated() {
        let registry = registry();
        registry.breaker("alpaca").force_open();
        assert_eq!(registry.breaker("alpaca").state(), CircuitState::Open);
        assert_eq!(registry.breaker("market_data").state(), CircuitState::Closed);
    }

    #[test]
    fn register_custom_config() {
        let registry = registry();
        let custom = registry
            .register_breaker("market_data", CircuitBreakerConfig::market_data())
            .unwrap();
        assert_eq!(custom.config().failure_threshold, 3);
        assert!(Arc::ptr_eq(&custom, &registry.breaker("market_data")));

        let invalid = CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(registry.register_breaker("bad", invalid).is_err());
    }

    #[test]
    fn invalid_defaults_are_rejected() {
        let limiter = RateLimiterConfig {
            calls_per_hour: 0,
            ..RateLimiterConfig::default()
        };
        assert!(ResilienceRegistry::new(CircuitBreakerConfig::default(), limiter).is_err());
    }

    #[test]
    fn stats_sorted_and_reset_all() {
        let registry = registry();
        registry.breaker("zeta").force_open();
        registry.breaker("alpha").force_open();

        let names: Vec<_> = registry.breaker_stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        registry.reset_all();
        assert!(registry
            .breaker_stats()
            .iter()
            .all(|s| s.state == CircuitState::Closed));
    }
}
