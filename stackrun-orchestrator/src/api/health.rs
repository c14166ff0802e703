//! Health Check API Handler
//!
//! Liveness endpoint for monitoring.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::AppState;
use crate::config::StorageBackend;

/// GET /health
/// Reports liveness and the storage backend in use
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let storage = match state.config.storage {
        StorageBackend::Postgres => "postgres",
        StorageBackend::Memory => "memory",
    };

    Json(json!({ "status": "ok", "storage": storage }))
}
