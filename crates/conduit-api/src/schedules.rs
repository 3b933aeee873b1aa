//! Per-connection cron schedules.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use conduit_types::schedule::Schedule;
use conduit_types::state::ConnectionId;
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/schedules/{id}", get(get_schedule).put(put_schedule))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(state.scheduler.get_schedule(&ConnectionId::new(id)).await?))
}

async fn put_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleRequest>,
) -> Result<Json<Schedule>, ApiError> {
    let schedule = state
        .scheduler
        .put_schedule(
            &ConnectionId::new(id),
            &body.cron,
            &body.timezone,
            body.enabled,
            chrono::Utc::now(),
        )
        .await?;
    Ok(Json(schedule))
}
