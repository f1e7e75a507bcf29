//! Broker Resilience Binary
//!
//! Runs the resilience layer against Alpaca: connects the market-data stream,
//! logs a buying-power snapshot and domain events, and exposes Prometheus
//! metrics until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-resilience
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_KEY`: Broker API key
//! - `ALPACA_SECRET`: Broker API secret
//!
//! ## Optional
//! - `BROKER_ENV`: PAPER | LIVE (default: PAPER)
//! - `ALPACA_FEED`: iex | sip (default: iex)
//! - `STREAM_SYMBOLS`: comma-separated symbols to stream
//! - `METRICS_PORT`: Prometheus port (default: 9090)
//! - `RUST_LOG`: Log filter (default: `broker_resilience=info,warn`)
//!
//! Every other tunable is listed in [`ResilienceConfig`].

use std::time::Duration;

use anyhow::Context;
use broker_resilience::application::ports::BrokerPort;
use broker_resilience::infrastructure::config::{Container, ResilienceConfig};
use broker_resilience::observability::init_metrics;
use broker_resilience::telemetry::{TelemetryConfig, init_telemetry};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Budget for the stream to disconnect on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv_from_ancestors();
    let _telemetry = init_telemetry(&TelemetryConfig::from_env());

    let config = ResilienceConfig::from_env().context("loading configuration")?;
    tracing::info!(
        environment = %config.alpaca.environment,
        feed = config.alpaca.feed.as_str(),
        symbols = config.stream_symbols.len(),
        metrics_addr = %config.metrics.listen_addr,
        "Starting broker resilience layer"
    );
    if config.alpaca.environment.is_live() {
        tracing::warn!("LIVE trading environment selected");
    }

    init_metrics(&config.metrics).context("installing metrics exporter")?;
    let container = Container::from_config(&config).context("wiring components")?;

    let shutdown = CancellationToken::new();
    let event_logger = tokio::spawn(log_events(&container, shutdown.clone()));

    log_buying_power(&container).await;

    let stream = container.stream();
    stream.on_quote(|quote| {
        tracing::trace!(symbol = %quote.symbol, bid = %quote.bid, ask = %quote.ask, "Quote");
    });
    if config.stream_symbols.is_empty() {
        tracing::info!("STREAM_SYMBOLS not set, market-data stream stays idle");
    } else if !stream.start(|| config.stream_symbols.clone()).await {
        tracing::warn!("Stream not connected yet, reconnecting in background");
    }

    shutdown_signal().await;

    shutdown.cancel();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, stream.stop()).await {
        Ok(true) => tracing::info!("Stream stopped"),
        Ok(false) | Err(_) => tracing::warn!("Stream did not stop cleanly"),
    }
    let _ = event_logger.await;

    tracing::info!("Broker resilience layer stopped");
    Ok(())
}

async fn log_buying_power(container: &Container) {
    match container.broker().get_buying_power().await {
        Ok(buying_power) => tracing::info!(%buying_power, "Buying power snapshot"),
        Err(e) => tracing::warn!(error = %e, "Buying power unavailable at startup"),
    }
}

fn log_events(
    container: &Container,
    shutdown: CancellationToken,
) -> impl Future<Output = ()> + Send + 'static {
    let mut events = container.events().subscribe();
    async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => tracing::info!(event = event.name(), ?event, "Domain event"),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event logger lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
}
