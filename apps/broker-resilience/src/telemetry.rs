//! Tracing Setup
//!
//! Console logging through `tracing-subscriber`, optionally mirrored to an
//! OTLP collector.
//!
//! # Configuration
//!
//! - `RUST_LOG`: filter directives (default: `broker_resilience=info,warn`)
//! - `OTEL_ENABLED`: set to `false` to disable OTLP export (console only)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector endpoint (default: `http://localhost:4317`)
//! - `OTEL_SERVICE_NAME`: service name on exported spans (default: `broker-resilience`)
//! - `LOG_ANSI`: set to `true` for colored output

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "broker_resilience=info,warn";
const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_SERVICE_NAME: &str = "broker-resilience";

/// Resolved tracing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub otel_enabled: bool,
    /// OTLP gRPC endpoint.
    pub endpoint: String,
    /// Service name attached to exported spans.
    pub service_name: String,
    /// Colored console output.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otel_enabled: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            ansi: false,
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            otel_enabled: lookup("OTEL_ENABLED")
                .map_or(defaults.otel_enabled, |v| !v.trim().eq_ignore_ascii_case("false")),
            endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.endpoint),
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            ansi: lookup("LOG_ANSI").is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
        }
    }
}

/// Guard that shuts down the tracer provider on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Error shutting down tracer provider: {e:?}");
        }
    }
}

/// Install the global subscriber.
///
/// Falls back to console-only logging when the OTLP exporter cannot be built.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
#[must_use]
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(config.ansi);

    if !config.otel_enabled {
        Registry::default().with(env_filter).with(fmt_layer).init();
        return TelemetryGuard { provider: None };
    }

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            Registry::default().with(env_filter).with(fmt_layer).init();
            tracing::warn!(error = ?e, "OTLP exporter unavailable, using console logging only");
            return TelemetryGuard { provider: None };
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();
    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()));

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    tracing::info!(
        service_name = %config.service_name,
        endpoint = %config.endpoint,
        "OpenTelemetry initialized"
    );

    TelemetryGuard {
        provider: Some(provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_export_over_otlp() {
        let config = TelemetryConfig::from_lookup(|_| None);
        assert_eq!(config, TelemetryConfig::default());
        assert!(config.otel_enabled);
        assert!(!config.ansi);
    }

    #[test]
    fn otel_can_be_disabled() {
        let config = TelemetryConfig::from_lookup(|key| {
            (key == "OTEL_ENABLED").then(|| "False".to_string())
        });
        assert!(!config.otel_enabled);
    }

    #[test]
    fn reads_overrides() {
        let config = TelemetryConfig::from_lookup(|key| match key {
            "LOG_ANSI" => Some("true".to_string()),
            "OTEL_SERVICE_NAME" => Some("resilience-paper".to_string()),
            _ => None,
        });
        assert!(config.ansi);
        assert_eq!(config.service_name, "resilience-paper");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }
}
