//! Stock Stream Server Binary
//!
//! Starts the WebSocket quote streaming server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin stock-stream-server
//! ```
//!
//! # Environment Variables
//!
//! - `WEBSOCKET_PORT`: HTTP/WebSocket port (default: 3002)
//! - `MAX_CONNECTIONS_PER_IP`: Per-origin connection cap (default: 50)
//! - `CLIENT_BUFFER_CAPACITY`: Per-client outbound queue size (default: 256)
//! - `STOCK_QUOTES_INTERVAL`: Per-symbol poll period in ms (default: 2000)
//! - `MARKET_DATA_INTERVAL`: Market overview period in ms (default: 5000)
//! - `PORTFOLIO_UPDATE_INTERVAL`: Portfolio tick period in ms (default: 10000)
//! - `UPSTREAM_TIMEOUT_MS`: Bound on each upstream call (default: 10000)
//! - `QUOTE_SOURCE`: yahoo | simulated (default: yahoo)
//! - `YAHOO_BASE_URL`: Yahoo chart endpoint
//! - `QUOTE_CACHE_TTL_SECS`: Quote cache TTL (default: 60)
//! - `QUOTE_MIN_REQUEST_INTERVAL_MS`: Upstream request spacing (default: 250)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: stock-stream-server)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use stock_stream_server::infrastructure::quote_source;
use stock_stream_server::infrastructure::telemetry;
use stock_stream_server::{App, ServerConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Stock Stream Server");

    // Prometheus recorder backs the /metrics route
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics recorder unavailable");
    }

    let config = ServerConfig::from_env()?;
    log_config(&config);

    let source = quote_source::from_settings(&config.quote_source)?;

    let shutdown_token = CancellationToken::new();
    let app = App::start(&config, source, shutdown_token.clone());

    let http_server = app.http_server();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        app.stop().await;
        let _ = http_handle.await;
    })
    .await;

    if drained.is_err() {
        tracing::warn!("Shutdown timed out, exiting anyway");
    }

    tracing::info!("Stock Stream Server stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        port = config.server.port,
        max_connections_per_origin = config.server.max_connections_per_origin,
        quote_source = config.quote_source.kind.as_str(),
        "Configuration loaded"
    );
    tracing::debug!(
        stock_interval_ms = config.streams.stock_interval.as_millis(),
        market_interval_ms = config.streams.market_interval.as_millis(),
        portfolio_interval_ms = config.streams.portfolio_interval.as_millis(),
        upstream_timeout_ms = config.streams.upstream_timeout.as_millis(),
        "Stream intervals"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
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

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
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
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
