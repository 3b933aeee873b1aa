//! Async bridge onto the blocking state backend.

use std::sync::Arc;

use conduit_state::{StateBackend, StateError};

use crate::errors::SyncError;

/// Run a state operation on the blocking pool.
pub(crate) async fn with_state<T, F>(state: &Arc<dyn StateBackend>, op: F) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: FnOnce(&dyn StateBackend) -> Result<T, StateError> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || op(state.as_ref()))
        .await
        .map_err(|e| SyncError::Infrastructure(anyhow::anyhow!("state task panicked: {e}")))?
        .map_err(SyncError::State)
}
