use anyhow::{Context, Result};
use std::net::SocketAddr;

mod handlers;
mod routes;
mod state;

use common::{bootstrap, telemetry};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = bootstrap::load_settings()?;

    telemetry::init_logging(
        &config.observability.log_level,
        config.observability.log_format,
    )?;
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting back office API server"
    );

    let metrics_handle = telemetry::init_metrics()?;

    // The pool is created lazily; migrations trigger the first acquire
    let pool_manager = bootstrap::init_pool_manager(&config);
    bootstrap::run_migrations(&pool_manager)
        .await
        .context("Failed to apply database migrations")?;

    let state = AppState::new(pool_manager.clone(), metrics_handle);
    let app = routes::create_router(state);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = pool_manager.release().await {
        tracing::error!(error = %e, "Failed to release database pool on shutdown");
    }

    tracing::info!("API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
