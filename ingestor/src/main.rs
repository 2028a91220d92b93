use anyhow::Context;
use axum::{http::StatusCode, routing::get, Router};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ingestor::clock::SystemClock;
use ingestor::config::Config;
use ingestor::lifecycle::StorageLifecycle;
use ingestor::normalize::Normalizer;
use ingestor::{metrics, rest, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    info!("Starting MST01 telemetry ingestor");
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.redacted_database_url());
    info!("Table: {}", config.table);
    info!(
        "Query limits: default={}, max={}; raw payload retained: {}",
        config.default_limit, config.max_limit, config.retain_raw_payload
    );

    metrics::init_metrics().context("failed to register metrics")?;

    let lifecycle = Arc::new(StorageLifecycle::new());
    let state = rest::AppState::new(
        lifecycle.clone(),
        Normalizer::new(config.retain_raw_payload),
        Arc::new(SystemClock::new()),
    );

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    // Requests are answered with "not initialized" until storage is ready.
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    if let Err(e) = lifecycle.connect(|| store::open(&config)).await {
        error!("Cannot serve without storage: {}", e);
        std::process::exit(1);
    }

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> Result<String, StatusCode> {
    metrics::gather_metrics().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
