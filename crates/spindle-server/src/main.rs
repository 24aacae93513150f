//! spindle-server entry point.

use spindle_core::DeviceOrchestrator;
use spindle_server::{http, AppState, ServerConfig};
use spindle_spdk::SpdkClient;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("spindle_server=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting spindle server");

    let config = ServerConfig::from_env();
    tracing::info!(?config, "Configuration loaded");

    // Sockets may appear later, so only warn.
    config.validate_warn();

    let spdk = SpdkClient::new(&config.spdk_address).with_timeout(config.request_timeout);
    let orchestrator = DeviceOrchestrator::new(Arc::new(spdk), config.kvm_config()?);
    let state = Arc::new(AppState::new(orchestrator, config.request_timeout));

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    };

    http::serve(state.clone(), config.http_addr, shutdown).await?;

    let remaining = state.registry().len().await;
    if remaining > 0 {
        tracing::warn!(devices = remaining, "Shutting down with devices still attached");
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}
