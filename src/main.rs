//! Document AI gateway - Main Application Entry Point
//!
//! A REST API that fronts an external AI service. Callers authenticate with
//! API keys, are throttled per key, and every call is tracked as a
//! transaction plus a usage record. Account owners manage their keys and
//! read their history with session tokens.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: API keys (SHA-256 hashed) and HS256 session tokens
//! - **Upstream**: reqwest, streamed multipart in and streamed documents out
//!
//! # Startup Flow
//!
//! 1. Load and validate configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Build shared state and create the document directories
//! 5. Start server on configured port

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often idle per-IP limiter entries are dropped.
const IP_LIMITER_SWEEP: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG, defaults to "info"
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(?config, "Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let state = state::AppState::new(&config, pool)?;
    state.documents.ensure_dirs().await?;

    if let Some(limiter) = state.ip_limiter.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(IP_LIMITER_SWEEP);
            loop {
                interval.tick().await;
                limiter.retain_recent();
            }
        });
    }

    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the per-IP cap.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
