//! Mapping from engine errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conduit_engine::SyncError;

/// Handler error: a [`SyncError`] rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// A 400 carrying a single validation problem.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self(SyncError::Validation(vec![message.into()]))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::LockConflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            SyncError::Validation(problems) => serde_json::json!({
                "error": "validation failed",
                "details": problems,
            }),
            other => serde_json::json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_engine::Rejected;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::invalid("bad").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError(SyncError::NotFound {
                entity: "run",
                id: "7".into()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(SyncError::LockConflict(Rejected::AlreadyRunning)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(SyncError::Infrastructure(anyhow::anyhow!("boom"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
