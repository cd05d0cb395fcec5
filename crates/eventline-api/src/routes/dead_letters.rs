//! Routes for operating on dead-letter entries.

use axum::extract::{Path, Query, State};
use axum::{Json, Router, routing::get, routing::post};
use eventline_core::dead_letter::DeadLetterEntry;
use eventline_ingestion::application::dead_letters::ReprocessOutcome;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// Query parameters for GET /.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Maximum entries returned; clamped to `1..=1000`.
    pub limit: Option<i64>,
}

/// Request body for POST /{id}/resolve.
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// Operator closing the entry.
    pub resolved_by: String,
}

/// Response body for POST /{id}/resolve.
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    /// The addressed entry.
    pub id: Uuid,
    /// `false` when the entry had been resolved before.
    pub resolved: bool,
}

/// GET /
#[instrument(skip(state))]
async fn list_unresolved(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeadLetterEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.dead_letters.list_unresolved(limit).await?))
}

/// GET /{id}
#[instrument(skip(state))]
async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeadLetterEntry>, ApiError> {
    Ok(Json(state.dead_letters.get(id).await?))
}

/// POST /{id}/reprocess
#[instrument(skip(state))]
async fn reprocess(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReprocessOutcome>, ApiError> {
    Ok(Json(state.dead_letters.reprocess(id).await?))
}

/// POST /{id}/resolve
#[instrument(skip(state, request), fields(resolved_by = %request.resolved_by))]
async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let resolved = state.dead_letters.resolve(id, &request.resolved_by).await?;
    Ok(Json(ResolveResponse { id, resolved }))
}

/// Returns the router for dead-letter operations.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_unresolved))
        .route("/{id}", get(get_entry))
        .route("/{id}/reprocess", post(reprocess))
        .route("/{id}/resolve", post(resolve))
}
