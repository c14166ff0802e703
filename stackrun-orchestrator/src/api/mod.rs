//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod credential;
pub mod error;
pub mod health;
pub mod resource;
pub mod run;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::repository::Stores;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub config: Arc<Config>,
    /// Cancelled on shutdown; runs and streams hang child tokens off it
    pub shutdown: CancellationToken,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Resource endpoints
        .route("/resources", post(resource::create_resource))
        .route("/resources/{id}", get(resource::get_resource))
        // Credential endpoints
        .route(
            "/credentials",
            post(credential::create_credential).get(credential::list_credentials),
        )
        // Run endpoints
        .route("/runs/deploy", post(run::deploy))
        .route("/runs", get(run::list_runs))
        .route("/runs/{id}", get(run::get_run))
        .route("/runs/{id}/stream", get(run::stream_run))
        .route("/runs/{id}/logs", delete(run::delete_run_logs))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
