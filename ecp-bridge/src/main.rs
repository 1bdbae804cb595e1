//! CIM ECP bridge web server.
//!
//! Serves the publish and read endpoints. Every request opens its own AMQP
//! connection, so nothing broker-related outlives a request.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ecp_bridge::web::{router, AppState};
use ecp_bridge::config::DEFAULT_LOG_LEVEL;
use ecp_bridge::{AmqpTransport, Config, Drainer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env();

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    config.validate().map_err(|e| anyhow!(e))?;
    info!(
        broker = %redacted(&config.broker_url()),
        send_queue = %config.send_queue,
        reply_queue = %config.reply_queue,
        label = ?config.label,
        sender = ?config.sender,
        recipient = ?config.recipient,
        port = config.http_port,
        "config_loaded"
    );

    let transport = Arc::new(AmqpTransport::new(config.prefetch_window));
    let state = AppState::new(config.clone(), transport);

    probe_queues(&state.drainer, &config).await;

    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Log the depth of both configured queues. Failures are logged, never fatal.
async fn probe_queues(drainer: &Drainer, config: &Config) {
    for queue in [&config.send_queue, &config.reply_queue] {
        match drainer.probe(queue).await {
            Ok(depth) => info!(queue = %queue, depth = depth, "amqp_queue_probed"),
            Err(e) => warn!(queue = %queue, error = %e, "amqp_queue_probe_failed"),
        }
    }
}

/// Broker URL with any password masked.
fn redacted(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
