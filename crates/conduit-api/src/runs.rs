//! Run inspection and cancellation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use conduit_types::run::SyncRun;
use conduit_types::state::RunId;

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/cancel", post(cancel_run))
}

/// Live progress while the run is owned by this instance, the stored record
/// otherwise.
async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SyncRun>, ApiError> {
    Ok(Json(state.coordinator.run(RunId::new(id)).await?))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.cancel(RunId::new(id)).await?;
    Ok(StatusCode::ACCEPTED)
}
