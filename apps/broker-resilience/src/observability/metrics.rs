//! Prometheus metrics for the resilience layer.
//!
//! Covers circuit breakers, rate limiters, settlement runs, and the market-data
//! stream. Every recorder is a no-op until [`init_metrics`] installs the
//! exporter, so library users and tests pay nothing.
//!
//! # Example
//!
//! ```ignore
//! use broker_resilience::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! ```

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::StreamState;
use crate::resilience::CircuitState;

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for settlement durations (in seconds).
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            // 100ms to 2 minutes
            duration_buckets: vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration with custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP listener exposing `/metrics`. Calling this more than once is
/// harmless: later calls log and return `Ok`.
///
/// # Errors
///
/// Returns an error if the exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if let Some(addr) = INSTALLED.get() {
        tracing::debug!(%addr, "Prometheus metrics exporter already installed");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.duration_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    let _ = INSTALLED.set(config.listen_addr);
    tracing::info!(addr = %config.listen_addr, "Prometheus metrics exporter started");
    Ok(())
}

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Update the circuit breaker state gauge (0=closed, 1=open, 2=`half_open`).
pub fn record_circuit_state(name: &str, state: CircuitState) {
    gauge!("circuit_breaker_state", "name" => name.to_string()).set(state.as_gauge());
}

/// Record a call rejected by an open circuit.
pub fn record_circuit_rejection(name: &str) {
    counter!("circuit_breaker_rejected_total", "name" => name.to_string()).increment(1);
}

// ============================================================================
// Rate Limiter Metrics
// ============================================================================

/// Record a call refused by a local rate limiter.
pub fn record_rate_limited(name: &str) {
    counter!("rate_limit_rejected_total", "name" => name.to_string()).increment(1);
}

/// Record a provider-side throttling response.
pub fn record_provider_throttled(name: &str) {
    counter!("rate_limit_provider_throttled_total", "name" => name.to_string()).increment(1);
}

// ============================================================================
// Buying Power Metrics
// ============================================================================

/// Record a buying-power verification outcome.
///
/// # Arguments
///
/// * `available` - Whether the expected amount was reached
/// * `attempts` - Reads performed
pub fn record_buying_power_check(available: bool, attempts: u32) {
    let outcome = if available { "available" } else { "insufficient" };
    counter!("buying_power_checks_total", "outcome" => outcome).increment(1);
    histogram!("buying_power_attempts").record(f64::from(attempts));
}

// ============================================================================
// Settlement Metrics
// ============================================================================

/// Record a completed settlement run.
///
/// # Arguments
///
/// * `settled` - Orders that reached a terminal state
/// * `timed_out` - Orders abandoned at the deadline
/// * `released` - Total released value
/// * `elapsed_seconds` - Wall time of the run
pub fn record_settlement_run(settled: usize, timed_out: usize, released: Decimal, elapsed_seconds: f64) {
    counter!("settlement_runs_total").increment(1);
    counter!("settlement_orders_total", "outcome" => "settled").increment(settled as u64);
    counter!("settlement_orders_total", "outcome" => "timed_out").increment(timed_out as u64);
    histogram!("settlement_released_value").record(released.to_f64().unwrap_or(0.0));
    histogram!("settlement_duration_seconds").record(elapsed_seconds);
}

/// Record a failed order poll.
pub fn record_settlement_poll_error(kind: &'static str) {
    counter!("settlement_poll_errors_total", "kind" => kind).increment(1);
}

// ============================================================================
// Market Data Stream Metrics
// ============================================================================

/// Update the stream state gauge.
pub fn record_stream_state(state: StreamState) {
    gauge!("stream_state").set(state.as_gauge());
}

/// Record a reconnect attempt and whether it was skipped by the breaker.
pub fn record_stream_reconnect(skipped: bool) {
    let outcome = if skipped { "skipped" } else { "attempted" };
    counter!("stream_reconnect_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a market-data message dropped because the consumer lagged.
pub fn record_stream_dropped() {
    counter!("stream_messages_dropped_total").increment(1);
}

/// Record a market-data message delivered to the consumer.
pub fn record_stream_message(kind: &'static str) {
    counter!("stream_messages_total", "kind" => kind).increment(1);
}

/// Record a quote or trade handler that panicked.
pub fn record_handler_failure(kind: &'static str) {
    counter!("stream_handler_failures_total", "kind" => kind).increment(1);
}
