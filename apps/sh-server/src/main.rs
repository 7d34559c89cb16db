//! Sh Server Binary
//!
//! Starts the Sh profile query/subscription server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sh-server
//! ```
//!
//! # Environment Variables
//!
//! - `SH_SERVER_NOTIFY_INTERVAL_MS`: Push notification interval (default: 5000)
//! - `SH_SERVER_EVENT_QUEUE_CAPACITY`: Inbound event queue capacity (default: 1024)
//! - `SH_SERVER_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `SH_SERVER_PEERS`: Comma-separated peer identities (default: none)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: sh-server)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use sh_server::infrastructure::health::{HealthServer, HealthServerState};
use sh_server::infrastructure::telemetry;
use sh_server::{ChannelTransport, OutboundMessage, ServerConfig, ShServer, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        span_export = telemetry_guard.is_exporting(),
        "Starting Sh server"
    );

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = ServerConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Transport seeded with the configured peers
    let (transport, outbound_rx) = ChannelTransport::new();
    transport.set_peers(config.peers.iter().cloned());
    tokio::spawn(drain_outbound(outbound_rx));

    let server = Arc::new(ShServer::new(&config, Arc::new(transport)));

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&server),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn event loop
    let event_loop_server = Arc::clone(&server);
    let event_loop = tokio::spawn(async move {
        if let Err(e) = event_loop_server.start().await {
            tracing::error!(error = %e, "Event loop error");
        }
    });

    tracing::info!("Sh server ready");

    await_shutdown(shutdown_token).await;
    server.stop();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, event_loop).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Event loop did not stop in time"
        );
    }

    tracing::info!("Sh server stopped");
    Ok(())
}

/// Log outbound messages handed to the in-process transport.
async fn drain_outbound(mut rx: mpsc::UnboundedReceiver<OutboundMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            OutboundMessage::Answer { activity, answer } => {
                tracing::debug!(
                    activity = %activity,
                    correlation = %answer.correlation,
                    result_code = %answer.result_code,
                    "Answer delivered"
                );
            }
            OutboundMessage::PushNotification {
                activity,
                notification,
            } => {
                tracing::debug!(
                    activity = %activity,
                    correlation = %notification.correlation,
                    sequence = notification.sequence,
                    "Push notification delivered"
                );
            }
        }
    }
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
        notify_interval_ms = config.notification.interval.as_millis(),
        queue_capacity = config.event_loop.queue_capacity,
        health_port = config.server.health_port,
        peers = config.peers.len(),
        "Configuration loaded"
    );
}

/// Load .env file from any ancestor directory.
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
