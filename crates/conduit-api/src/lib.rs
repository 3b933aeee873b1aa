//! HTTP surface of the Conduit sync engine.
//!
//! Thin axum handlers over [`ConnectionService`], [`Coordinator`] and
//! [`Scheduler`]; every engine error maps to a JSON `{"error": ..}` body.

pub mod connections;
pub mod error;
pub mod runs;
pub mod schedules;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use conduit_engine::{ConnectionService, ConnectorSpec, Coordinator, Scheduler};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub connections: ConnectionService,
    pub scheduler: Arc<Scheduler>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_connectors(State(state): State<AppState>) -> Json<Vec<ConnectorSpec>> {
    Json(state.coordinator.registry().list())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/connectors", get(list_connectors))
        .merge(connections::router())
        .merge(runs::router())
        .merge(schedules::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {addr}"))?;
    tracing::info!(%addr, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server failed")?;
    tracing::info!("API stopped");
    Ok(())
}
