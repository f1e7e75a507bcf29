//! Resilience Layer Configuration
//!
//! Loaded from environment variables. Unparseable optional values fall back
//! to their defaults; every component config is validated before use.

use std::net::SocketAddr;
use std::time::Duration;

use crate::application::services::{BuyingPowerConfig, SettlementConfig};
use crate::error::ValidationError;
use crate::infrastructure::broker::alpaca::{AlpacaConfig, AlpacaEnvironment, AlpacaFeed};
use crate::infrastructure::stream::StreamConfig;
use crate::observability::MetricsConfig;
use crate::resilience::{BackoffPolicy, CircuitBreakerConfig, RateLimiterConfig};

/// Complete configuration of the resilience layer.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Alpaca credentials, environment and feed.
    pub alpaca: AlpacaConfig,
    /// Breaker defaults for the broker REST API.
    pub breaker: CircuitBreakerConfig,
    /// Breaker guarding market-data stream connects.
    pub stream_breaker: CircuitBreakerConfig,
    /// Rate limiter defaults.
    pub rate_limiter: RateLimiterConfig,
    /// Settlement polling.
    pub settlement: SettlementConfig,
    /// Buying-power verification.
    pub buying_power: BuyingPowerConfig,
    /// Market-data stream.
    pub stream: StreamConfig,
    /// Symbols the stream subscribes to at startup.
    pub stream_symbols: Vec<String>,
    /// Prometheus exporter.
    pub metrics: MetricsConfig,
}

impl ResilienceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or a derived component
    /// configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_key = env.required("ALPACA_KEY")?;
        let api_secret = env.required("ALPACA_SECRET")?;

        let environment = env
            .get("BROKER_ENV")
            .and_then(|s| AlpacaEnvironment::parse(&s))
            .unwrap_or(AlpacaEnvironment::Paper);
        let feed = env
            .get("ALPACA_FEED")
            .and_then(|s| AlpacaFeed::parse(&s))
            .unwrap_or_default();
        let alpaca = AlpacaConfig::new(api_key, api_secret, environment).with_feed(feed);

        let breaker = env.breaker("BREAKER", &CircuitBreakerConfig::broker());
        breaker.validate()?;
        let stream_breaker = env.breaker("STREAM_BREAKER", &CircuitBreakerConfig::market_data());
        stream_breaker.validate()?;

        let limiter_defaults = RateLimiterConfig::default();
        let rate_limiter = RateLimiterConfig {
            calls_per_minute: env.u32("RATE_LIMIT_PER_MINUTE", limiter_defaults.calls_per_minute),
            calls_per_hour: env.u32("RATE_LIMIT_PER_HOUR", limiter_defaults.calls_per_hour),
            backoff_base: env.f64("RATE_LIMIT_BACKOFF_BASE", limiter_defaults.backoff_base),
            backoff_cap: env.secs("RATE_LIMIT_BACKOFF_CAP_SECS", limiter_defaults.backoff_cap),
        };
        rate_limiter.validate()?;

        let settlement_defaults = SettlementConfig::default();
        let settlement = SettlementConfig {
            poll_interval: env.millis(
                "SETTLEMENT_POLL_INTERVAL_MS",
                settlement_defaults.poll_interval,
            ),
            max_wait: env.secs("SETTLEMENT_MAX_WAIT_SECS", settlement_defaults.max_wait),
        };
        settlement.validate()?;

        let verifier_defaults = BuyingPowerConfig::default();
        let buying_power = BuyingPowerConfig {
            max_retries: env.u32("BUYING_POWER_MAX_RETRIES", verifier_defaults.max_retries),
            initial_wait: env.millis("BUYING_POWER_INITIAL_WAIT_MS", verifier_defaults.initial_wait),
            max_wait: env.secs("BUYING_POWER_MAX_WAIT_SECS", verifier_defaults.max_wait),
            jitter: env.f64("BUYING_POWER_JITTER", verifier_defaults.jitter),
        };
        buying_power.validate()?;

        let stream_defaults = StreamConfig::default();
        let stream = StreamConfig {
            connect_timeout: env.secs("STREAM_CONNECT_TIMEOUT_SECS", stream_defaults.connect_timeout),
            stop_timeout: env.secs("STREAM_STOP_TIMEOUT_SECS", stream_defaults.stop_timeout),
            reconnect: BackoffPolicy {
                initial: env.millis("STREAM_RECONNECT_INITIAL_MS", stream_defaults.reconnect.initial),
                max: env.secs("STREAM_RECONNECT_MAX_SECS", stream_defaults.reconnect.max),
                max_attempts: env.u32(
                    "STREAM_MAX_RECONNECT_ATTEMPTS",
                    stream_defaults.reconnect.max_attempts,
                ),
                ..stream_defaults.reconnect.clone()
            },
            channel_capacity: env.usize("STREAM_CHANNEL_CAPACITY", stream_defaults.channel_capacity),
        };
        stream.validate()?;

        let stream_symbols = env
            .get("STREAM_SYMBOLS")
            .map(|raw| parse_symbol_list(&raw))
            .unwrap_or_default();

        let metrics = MetricsConfig::with_addr(SocketAddr::from((
            [0, 0, 0, 0],
            env.u16("METRICS_PORT", MetricsConfig::default().listen_addr.port()),
        )));

        Ok(Self {
            alpaca,
            breaker,
            stream_breaker,
            rate_limiter,
            settlement,
            buying_power,
            stream,
            stream_symbols,
            metrics,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A derived component configuration is invalid.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Split a comma-separated symbol list, dropping blanks.
#[must_use]
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect()
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parsed(key).unwrap_or(default)
    }

    fn u32(&self, key: &str, default: u32) -> u32 {
        self.parsed(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parsed(key).unwrap_or(default)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.parsed(key).unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.parsed::<u64>(key).map_or(default, Duration::from_millis)
    }

    /// `{prefix}_FAILURE_THRESHOLD` and friends over `defaults`.
    fn breaker(&self, prefix: &str, defaults: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.u32(&format!("{prefix}_FAILURE_THRESHOLD"), defaults.failure_threshold),
            success_threshold: self.u32(&format!("{prefix}_SUCCESS_THRESHOLD"), defaults.success_threshold),
            timeout: self.secs(&format!("{prefix}_TIMEOUT_SECS"), defaults.timeout),
            half_open_max_calls: self.u32(
                &format!("{prefix}_HALF_OPEN_MAX_CALLS"),
                defaults.half_open_max_calls,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ResilienceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ResilienceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const CREDENTIALS: [(&str, &str); 2] = [("ALPACA_KEY", "key123"), ("ALPACA_SECRET", "secret456")];

    #[test]
    fn defaults_with_credentials_only() {
        let config = load(&CREDENTIALS).unwrap();

        assert_eq!(config.alpaca.environment, AlpacaEnvironment::Paper);
        assert_eq!(config.alpaca.feed, AlpacaFeed::Iex);
        assert_eq!(config.breaker, CircuitBreakerConfig::default());
        assert_eq!(config.stream_breaker, CircuitBreakerConfig::market_data());
        assert_eq!(config.rate_limiter, RateLimiterConfig::default());
        assert_eq!(config.settlement, SettlementConfig::default());
        assert_eq!(config.stream, StreamConfig::default());
        assert!(config.stream_symbols.is_empty());
        assert_eq!(config.metrics.listen_addr.port(), 9090);
    }

    #[test]
    fn missing_credentials() {
        assert!(matches!(
            load(&[("ALPACA_KEY", "key")]),
            Err(ConfigError::MissingEnvVar(key)) if key == "ALPACA_SECRET"
        ));
        assert!(matches!(
            load(&[("ALPACA_KEY", " "), ("ALPACA_SECRET", "s")]),
            Err(ConfigError::EmptyValue(key)) if key == "ALPACA_KEY"
        ));
    }

    #[test]
    fn overrides_are_applied() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.extend([
            ("BROKER_ENV", "live"),
            ("ALPACA_FEED", "SIP"),
            ("BREAKER_FAILURE_THRESHOLD", "3"),
            ("RATE_LIMIT_PER_MINUTE", "100"),
            ("SETTLEMENT_POLL_INTERVAL_MS", "250"),
            ("STREAM_SYMBOLS", "aapl, msft,,SPY "),
            ("STREAM_MAX_RECONNECT_ATTEMPTS", "4"),
        ]);
        let config = load(&pairs).unwrap();

        assert!(config.alpaca.environment.is_live());
        assert_eq!(config.alpaca.feed, AlpacaFeed::Sip);
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.rate_limiter.calls_per_minute, 100);
        assert_eq!(config.settlement.poll_interval, Duration::from_millis(250));
        assert_eq!(config.stream.reconnect.max_attempts, 4);
        assert_eq!(config.stream_symbols, vec!["AAPL", "MSFT", "SPY"]);
    }

    #[test]
    fn stream_breaker_is_configured_separately() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.extend([
            ("BREAKER_FAILURE_THRESHOLD", "9"),
            ("STREAM_BREAKER_FAILURE_THRESHOLD", "2"),
            ("STREAM_BREAKER_TIMEOUT_SECS", "45"),
        ]);
        let config = load(&pairs).unwrap();

        assert_eq!(config.breaker.failure_threshold, 9);
        assert_eq!(config.stream_breaker.failure_threshold, 2);
        assert_eq!(config.stream_breaker.timeout, Duration::from_secs(45));
        assert_eq!(
            config.stream_breaker.success_threshold,
            CircuitBreakerConfig::market_data().success_threshold
        );

        pairs.push(("STREAM_BREAKER_FAILURE_THRESHOLD", "0"));
        assert!(matches!(load(&pairs), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unparseable_values_fall_back() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.extend([("BREAKER_TIMEOUT_SECS", "soon"), ("BROKER_ENV", "staging")]);
        let config = load(&pairs).unwrap();

        assert_eq!(config.breaker.timeout, Duration::from_secs(60));
        assert_eq!(config.alpaca.environment, AlpacaEnvironment::Paper);
    }

    #[test]
    fn invalid_component_config_is_rejected() {
        let mut pairs = CREDENTIALS.to_vec();
        pairs.extend([
            ("SETTLEMENT_POLL_INTERVAL_MS", "5000"),
            ("SETTLEMENT_MAX_WAIT_SECS", "2"),
        ]);
        assert!(matches!(load(&pairs), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn credentials_are_redacted() {
        let config = load(&CREDENTIALS).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
    }
}
