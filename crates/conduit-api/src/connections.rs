//! Connection administration, manual triggers and run history.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use conduit_types::connection::{
    Connection, ConnectionPatch, ConnectionStatus, NewConnection, StreamConfig,
};
use conduit_types::run::{SyncRun, TriggerMode};
use conduit_types::state::{ConnectionId, RunId, StreamCursor, StreamName};
use conduit_types::wire::{DestinationSyncMode, SchemaChangePolicy, SyncMode};
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;

const DEFAULT_RUN_LIMIT: u32 = 20;
const MAX_RUN_LIMIT: u32 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connections", get(list_connections).post(create_connection))
        .route(
            "/connections/{id}",
            get(get_connection)
                .patch(update_connection)
                .delete(delete_connection),
        )
        .route("/connections/{id}/status", put(set_status))
        .route(
            "/connections/{id}/streams/{name}",
            put(upsert_stream).delete(remove_stream),
        )
        .route("/connections/{id}/cursors", get(list_cursors))
        .route("/connections/{id}/sync", post(trigger_sync))
        .route("/connections/{id}/runs", get(list_runs))
        .route("/connections/{id}/reset", post(reset))
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: ConnectionStatus,
}

/// Stream settings; the name comes from the path.
#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(default)]
    pub cursor_field: Option<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub on_schema_change: SchemaChangePolicy,
}

fn default_true() -> bool {
    true
}

impl StreamRequest {
    fn into_config(self, name: StreamName) -> StreamConfig {
        StreamConfig {
            name,
            sync_mode: self.sync_mode,
            destination_sync_mode: self.destination_sync_mode,
            cursor_field: self.cursor_field,
            primary_key: self.primary_key,
            enabled: self.enabled,
            on_schema_change: self.on_schema_change,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<u32>,
    pub before: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub confirm: bool,
    /// Reset only this stream instead of the whole connection.
    #[serde(default)]
    pub stream: Option<StreamName>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_connections(State(state): State<AppState>) -> Result<Json<Vec<Connection>>, ApiError> {
    Ok(Json(state.connections.list().await?))
}

async fn create_connection(
    State(state): State<AppState>,
    Json(body): Json<NewConnection>,
) -> Result<impl IntoResponse, ApiError> {
    let connection = state.connections.create(body).await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Connection>, ApiError> {
    Ok(Json(state.connections.get(&ConnectionId::new(id)).await?))
}

async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ConnectionPatch>,
) -> Result<Json<Connection>, ApiError> {
    let connection = state
        .connections
        .update(&ConnectionId::new(id), patch)
        .await?;
    Ok(Json(connection))
}

async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.connections.delete(&ConnectionId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<Connection>, ApiError> {
    let connection = state
        .connections
        .set_status(&ConnectionId::new(id), body.status)
        .await?;
    Ok(Json(connection))
}

async fn upsert_stream(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(body): Json<StreamRequest>,
) -> Result<Json<Connection>, ApiError> {
    let stream = body.into_config(StreamName::new(name));
    let connection = state
        .connections
        .upsert_stream(&ConnectionId::new(id), stream)
        .await?;
    Ok(Json(connection))
}

async fn remove_stream(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<Connection>, ApiError> {
    let connection = state
        .connections
        .remove_stream(&ConnectionId::new(id), &StreamName::new(name))
        .await?;
    Ok(Json(connection))
}

async fn list_cursors(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StreamCursor>>, ApiError> {
    Ok(Json(
        state.connections.list_cursors(&ConnectionId::new(id)).await?,
    ))
}

async fn trigger_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SyncRun>), ApiError> {
    let run = state
        .coordinator
        .trigger(&ConnectionId::new(id), TriggerMode::Manual)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<SyncRun>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT);
    if limit == 0 || limit > MAX_RUN_LIMIT {
        return Err(ApiError::invalid(format!(
            "limit must be between 1 and {MAX_RUN_LIMIT}"
        )));
    }
    let runs = state
        .coordinator
        .list_runs(&ConnectionId::new(id), limit, query.before.map(RunId::new))
        .await?;
    Ok(Json(runs))
}

async fn reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !body.confirm {
        return Err(ApiError::invalid(
            "reset discards replication state; resend with \"confirm\": true",
        ));
    }
    let removed = state
        .connections
        .reset(&ConnectionId::new(id), body.stream)
        .await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}
