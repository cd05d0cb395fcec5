//! Routes for submitting, inspecting and cancelling replays.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get, routing::post};
use eventline_core::replay::{CancelOutcome, ReplayJob, ReplayRequest};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /{replay_id}/cancel.
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// Who asks for the cancellation.
    pub cancelled_by: String,
}

/// Response body for POST /{replay_id}/cancel.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// The addressed job.
    pub replay_id: Uuid,
    /// What the request achieved.
    pub outcome: CancelOutcome,
}

/// POST /
#[instrument(skip(state, request))]
async fn submit_replay(
    State(state): State<AppState>,
    Json(request): Json<ReplayRequest>,
) -> Result<(StatusCode, Json<ReplayJob>), ApiError> {
    let job = state.replays.submit(request).await?;
    info!(replay_id = %job.replay_id, total_events = job.total_events, "replay accepted");
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /{replay_id}
#[instrument(skip(state))]
async fn get_replay(
    State(state): State<AppState>,
    Path(replay_id): Path<Uuid>,
) -> Result<Json<ReplayJob>, ApiError> {
    Ok(Json(state.replays.get(replay_id).await?))
}

/// POST /{replay_id}/start
#[instrument(skip(state))]
async fn start_replay(
    State(state): State<AppState>,
    Path(replay_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ReplayJob>), ApiError> {
    state.replays.start(replay_id).await?;
    Ok((StatusCode::ACCEPTED, Json(state.replays.get(replay_id).await?)))
}

/// POST /{replay_id}/cancel
#[instrument(skip(state, request), fields(cancelled_by = %request.cancelled_by))]
async fn cancel_replay(
    State(state): State<AppState>,
    Path(replay_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let outcome = state
        .replays
        .cancel(replay_id, &request.cancelled_by)
        .await?;
    Ok(Json(CancelResponse { replay_id, outcome }))
}

/// Returns the router for the replay context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_replay))
        .route("/{replay_id}", get(get_replay))
        .route("/{replay_id}/start", post(start_replay))
        .route("/{replay_id}/cancel", post(cancel_replay))
}
