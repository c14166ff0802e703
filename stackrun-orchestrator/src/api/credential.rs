//! Credential API Handlers
//!
//! Secrets go in through `POST /credentials` and never come back out;
//! listings only carry summaries.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use stackrun_core::dto::credential::{CreateCredential, CredentialSummary, ListCredentialsQuery};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::credential_service;

/// POST /credentials
pub async fn create_credential(
    State(state): State<AppState>,
    Json(req): Json<CreateCredential>,
) -> ApiResult<(StatusCode, Json<CredentialSummary>)> {
    let credential = credential_service::create_credential(&state.stores, req).await?;

    Ok((StatusCode::CREATED, Json(credential.into())))
}

/// GET /credentials
/// List credentials, optionally for one `provider`
pub async fn list_credentials(
    State(state): State<AppState>,
    Query(query): Query<ListCredentialsQuery>,
) -> ApiResult<Json<Vec<CredentialSummary>>> {
    let credentials = credential_service::list_credentials(&state.stores, query.provider).await?;

    Ok(Json(credentials))
}
