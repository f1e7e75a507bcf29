//! Observability: Prometheus metrics for the resilience layer.
//!
//! Logging and trace export live in [`crate::infrastructure::telemetry`].

pub mod metrics;

pub use metrics::{MetricsConfig, MetricsError, init_metrics};
