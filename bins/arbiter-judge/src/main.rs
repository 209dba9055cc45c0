mod config;
mod docker;
mod handlers;
mod orchestrator;
mod sandbox;

use anyhow::{Context, Result};
use config::JudgeConfig;
use handlers::AppState;
use orchestrator::Orchestrator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Arbiter judge booting...");

    let config = JudgeConfig::load().context("Failed to load judge configuration")?;
    info!(
        backend = %config.backend,
        image = %config.runner_image,
        memory_mb = config.memory_limit_mb,
        cpu_limit = config.cpu_limit,
        wall_timeout_ms = config.wall_timeout_ms,
        "Configuration loaded"
    );

    let sandbox = sandbox::from_config(&config)
        .await
        .context("Failed to initialize sandbox backend")?;
    info!(
        languages = ?arbiter_common::languages::supported_identifiers(),
        "Sandbox backend ready: {}",
        sandbox.name()
    );

    let orchestrator = Orchestrator::new(sandbox, config.work_root(), config.wall_timeout());
    let app = handlers::routes(Arc::new(AppState { orchestrator }));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Judge shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining in-flight requests");
}
