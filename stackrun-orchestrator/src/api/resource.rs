//! Resource API Handlers
//!
//! HTTP endpoints for storing and reading manifests.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use stackrun_core::domain::resource::CloudResource;
use stackrun_core::dto::resource::CreateResource;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::resource_service;

/// POST /resources
/// Store a manifest
pub async fn create_resource(
    State(state): State<AppState>,
    Json(req): Json<CreateResource>,
) -> ApiResult<(StatusCode, Json<CloudResource>)> {
    let resource = resource_service::create_resource(&state.stores, req).await?;

    Ok((StatusCode::CREATED, Json(resource)))
}

/// GET /resources/{id}
pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CloudResource>> {
    tracing::debug!("Getting resource: {}", id);

    let resource = resource_service::get_resource(&state.stores, id).await?;

    Ok(Json(resource))
}
