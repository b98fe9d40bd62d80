//! Staybook HTTP server.
//!
//! Wires Postgres repositories and the payment gateway into a
//! [`BookingEngine`], serves the HTTP API and exposes Prometheus metrics.

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use staybook::payment_gateway::HttpPaymentGateway;
use staybook::server::{AppState, build_router};
use staybook::stores::PostgresStores;
use staybook::{BookingEngine, Collaborators, Config};
use staybook_core::environment::SystemClock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the process environment is used as-is.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "staybook=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Staybook booking engine");

    let config = Config::from_env();
    info!(
        bind = %config.bind_address(),
        metrics = %config.metrics_address(),
        gateway = %config.gateway.base_url,
        "Configuration loaded"
    );

    let metrics_addr: SocketAddr = config
        .metrics_address()
        .parse()
        .context("invalid metrics address")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .context("invalid histogram buckets")?
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(address = %metrics_addr, "Metrics exporter listening");

    info!("Connecting to Postgres...");
    let stores = PostgresStores::connect(&config.postgres)
        .await
        .context("failed to connect to Postgres")?;
    stores
        .ensure_schema()
        .await
        .context("failed to apply schema")?;
    info!("Postgres ready");

    let gateway =
        HttpPaymentGateway::new(&config.gateway).context("failed to build gateway client")?;

    let stores = Arc::new(stores);
    let engine = BookingEngine::new(
        Collaborators {
            listings: stores.clone(),
            bookings: stores.clone(),
            wallets: stores,
            gateway: Arc::new(gateway),
            clock: Arc::new(SystemClock),
        },
        config.engine.clone(),
    );

    let app = build_router(AppState::new(engine.clone()));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("HTTP server stopped, draining in-flight flows");
    if let Err(e) = engine
        .shutdown(Duration::from_secs(config.server.shutdown_timeout))
        .await
    {
        error!(error = %e, "Engine shutdown incomplete");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
