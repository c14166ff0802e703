//! Run API Handlers
//!
//! HTTP endpoints for deploying resources, inspecting runs and following
//! their output.

use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use stackrun_core::domain::run::Run;
use stackrun_core::dto::log::{DeletedLogs, StreamQuery};
use stackrun_core::dto::run::{DeployRequest, ListRunsQuery, RunPage};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::{log_service, run_service, stream_service};

// =============================================================================
// Run Lifecycle Endpoints
// =============================================================================

/// POST /runs/deploy
/// Create a run for a stored resource; execution continues in the background
pub async fn deploy(
    State(state): State<AppState>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    tracing::info!("Deploy requested for resource: {}", req.resource_id);

    let run = run_service::deploy(
        &state.stores,
        state.config.clone(),
        req.resource_id,
        state.shutdown.child_token(),
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// GET /runs/{id}
/// Get run details by ID
pub async fn get_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Run>> {
    tracing::debug!("Getting run: {}", id);

    let run = run_service::get_run(&state.stores, id).await?;

    Ok(Json(run))
}

/// GET /runs
/// List runs newest first
///
/// Query parameters (all optional):
/// - `resource_id`, `status`: filters
/// - `page_num` (default 0), `page_size` (default 20)
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<RunPage>> {
    tracing::debug!("Listing runs: {:?}", query);

    let page = run_service::list_runs(&state.stores, &query).await?;

    Ok(Json(page))
}

// =============================================================================
// Run Log Endpoints
// =============================================================================

/// GET /runs/{id}/stream
/// Follow a run's output as server-sent events, one JSON frame per event
///
/// `last_sequence_num` resumes after a record the caller already holds.
pub async fn stream_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    tracing::debug!(
        "Streaming run {} after sequence {:?}",
        id,
        query.last_sequence_num
    );

    let subscription = stream_service::subscribe(
        &state.stores,
        id,
        query.last_sequence_num,
        state.config.stream_poll_interval,
        state.shutdown.child_token(),
    )
    .await?;

    let stream = stream::unfold(subscription, |mut subscription| async move {
        let frame = subscription.next().await?;
        let event = Event::default()
            .id(frame.sequence_num.to_string())
            .json_data(&frame)
            .unwrap_or_else(|e| Event::default().comment(format!("unencodable frame: {}", e)));
        Some((Ok(event), subscription))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// DELETE /runs/{id}/logs
/// Remove every persisted log record of a run
pub async fn delete_run_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedLogs>> {
    tracing::info!("Deleting logs for run: {}", id);

    let deleted = log_service::delete_all(&state.stores, id).await?;

    Ok(Json(DeletedLogs {
        run_id: id,
        deleted,
    }))
}
