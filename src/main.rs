mod batch;
mod brand;
mod chat;
mod config;
mod deadline;
mod gemini;
mod makeover;
mod models;
mod routes;

#[cfg(test)]
mod fake;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::gemini::{GeminiClient, GenerationClient};
use crate::routes::{router, spawn_idle_sweeper, AppState};

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env().context("refusing to start without Gemini credentials")?;
    tracing::info!("Using API key: {}", config.masked_api_key());

    let client: Arc<dyn GenerationClient> = Arc::new(GeminiClient::new(&config));
    let mut state = AppState::new(client);
    state.image_limit = config.image_limit;
    spawn_idle_sweeper(state.clone(), IDLE_SWEEP_INTERVAL, config.session_idle_limit);

    let app = router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
