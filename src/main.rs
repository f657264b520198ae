// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;

use crate::application::live_channel::LiveChannelClient;
use crate::application::template_directory::{FetchOutcome, TemplateDirectory};
use crate::application::tile_synchronizer::TileSynchronizer;
use crate::infrastructure::config::load_app_config;
use crate::infrastructure::logging::init_tracing;
use crate::infrastructure::template_api::HttpTemplateRepository;
use crate::infrastructure::websocket_connector::WebSocketConnector;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::routes;
use crate::presentation::live_monitor::LiveMonitor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let app_config = load_app_config()?;
    let base_url = app_config.api.base_url()?;
    let settings = app_config.channel.to_settings()?;

    // Create adapters (infrastructure layer)
    let repository = Arc::new(HttpTemplateRepository::new(base_url.to_string()));
    let connector = Arc::new(WebSocketConnector::new());

    // Create services (application layer)
    let directory = Arc::new(TemplateDirectory::new(repository));
    let channel = LiveChannelClient::new(settings, connector);
    let synchronizer = Arc::new(TileSynchronizer::new(directory.clone(), channel));
    let monitor = Arc::new(LiveMonitor::attach(synchronizer.clone()));

    match synchronizer.mount().await {
        Ok(FetchOutcome::Refreshed(count)) => tracing::info!("Loaded {} templates", count),
        Ok(FetchOutcome::Coalesced) => {}
        Err(e) => tracing::warn!("Initial template load failed, serving empty board: {}", e),
    }

    // Create application state
    let state = Arc::new(AppState {
        synchronizer: synchronizer.clone(),
        directory,
        monitor,
    });

    // Build router (presentation layer)
    let router = routes(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = app_config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", app_config.server.bind))?;
    tracing::info!("Starting live-tiles service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    synchronizer.unmount();
    tracing::info!("Live tiles service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
