//! MemoryHub - API-key authenticated semantic memory server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use memoryhub::config::ServerConfig;
use memoryhub::constants::SHUTDOWN_FLUSH_TIMEOUT_SECS;
use memoryhub::handlers::{build_router, MemoryHub};
use memoryhub::{metrics, middleware, tracing_setup};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging comes up before the rest of the config so parse warnings are visible
    let json_logs = std::env::var("MEMORYHUB_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_setup::init_tracing(json_logs)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let server_config = ServerConfig::from_env();

    metrics::register_metrics().context("failed to register metrics")?;
    info!("Metrics registered at /metrics");

    info!("Starting MemoryHub server...");
    server_config.log();

    let hub = Arc::new(MemoryHub::new(server_config.clone())?);
    let hub_for_shutdown = Arc::clone(&hub);

    let max_concurrent = server_config.max_concurrent_requests;
    info!(max_concurrent, "Concurrency limiting enabled");

    let app = build_router(hub)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            server_config.request_timeout_secs,
        )))
        .layer(ConcurrencyLimitLayer::new(max_concurrent))
        .layer(server_config.cors.to_layer());

    let addr = (server_config.host.as_str(), server_config.port);
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| {
        format!("failed to bind {}:{}", server_config.host, server_config.port)
    })?;
    info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, flushing storage...");

    let flush = tokio::task::spawn_blocking(move || hub_for_shutdown.flush());
    match tokio::time::timeout(Duration::from_secs(SHUTDOWN_FLUSH_TIMEOUT_SECS), flush).await {
        Ok(Ok(Ok(()))) => info!("Storage flushed successfully"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Failed to flush storage"),
        Ok(Err(e)) => tracing::error!(error = %e, "Flush task panicked"),
        Err(_) => tracing::error!(
            "Storage flush timed out after {}s",
            SHUTDOWN_FLUSH_TIMEOUT_SECS
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
