//! Entry point: wires configuration, the coalescer, the JSON batch transport,
//! and the HTTP front end together, and runs until shutdown is signaled.

use anyhow::Context;
use batch_coalescer::{AppState, BackendClient, Coalescer, CoalescerConfig, Config, build_router};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level);

    config.validate().map_err(anyhow::Error::msg).context("invalid configuration")?;

    let cancel = CancellationToken::new();

    let backend = BackendClient::new(&config.backend).context("failed to build backend HTTP client")?;
    let coalescer = Coalescer::new(
        CoalescerConfig::new(config.max_batch_size, config.batch_timeout(), backend.into_handler()),
        cancel.clone(),
    )
    .map_err(|e| anyhow::anyhow!(e))
    .context("failed to construct coalescer")?;

    let state = AppState::new(coalescer, config.idle_timeout())
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    let state = Arc::new(state);

    let app = build_router(state, config.max_concurrent_conns);

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(bind = %config.bind, backend = %config.backend, "batcher listening");

    let shutdown = shutdown_signal(cancel.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, stopping coalescer and draining waiters");
    cancel.cancel();
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
