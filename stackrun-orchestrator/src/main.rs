use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

use config::{Config, StorageBackend};
use repository::Stores;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stackrun_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stackrun Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Engine: {} (deploy timeout {}s, refresh timeout {}s)",
        config.engine_binary,
        config.deploy_timeout.as_secs(),
        config.refresh_timeout.as_secs()
    );

    let stores = match config.storage {
        StorageBackend::Postgres => {
            tracing::info!("Connecting to database...");

            // Create database connection pool
            let pool = db::create_pool(&config.database_url)
                .await
                .context("Failed to create database pool")?;

            tracing::info!("Database connection pool created");

            // Run migrations
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Stores::postgres(pool)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; runs and logs are lost on restart");
            Stores::in_memory()
        }
    };

    let shutdown = CancellationToken::new();
    let state = api::AppState {
        stores,
        config: Arc::new(config.clone()),
        shutdown: shutdown.clone(),
    };

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested, cancelling runs and streams");
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    Ok(())
}
