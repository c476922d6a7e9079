#![forbid(unsafe_code)]

use anyhow::Result;
use mcswarm::api::ControlServer;
use mcswarm::config::ControlConfig;
use mcswarm::metrics::SwarmMetrics;
use mcswarm::session::SessionController;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcswarm=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("mcswarm - Starting stress-test controller");

    let config = ControlConfig::from_env();
    info!(
        "Config: port={} max_clients={} spawn_concurrency={} connect_timeout={}ms teardown_timeout={}ms",
        config.port,
        config.max_clients,
        config.spawn_concurrency,
        config.connect_timeout.as_millis(),
        config.teardown_timeout.as_millis()
    );

    let metrics = SwarmMetrics::new();
    let port = config.port;
    let controller = Arc::new(SessionController::new(config, metrics.clone()));
    let server = ControlServer::new(controller.clone(), metrics);

    // Run server with graceful shutdown
    tokio::select! {
        result = server.serve(port) => {
            if let Err(e) = result {
                tracing::error!("Control API error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            controller.shutdown().await;
        }
    }

    info!("Controller shutdown complete");
    Ok(())
}
