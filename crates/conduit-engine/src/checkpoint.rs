//! Checkpoint ordering and cursor advancement logic.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use conduit_state::StateBackend;
use conduit_types::cursor::CursorValue;
use conduit_types::state::{ConnectionId, CursorState, RunId, StreamName};
use conduit_types::wire::SyncMode;

use crate::errors::SyncError;

/// Reject a batch checkpoint that moves behind `floor`.
///
/// `floor` is the committed cursor or an earlier checkpoint from the same
/// read. Equal positions are accepted.
///
/// # Errors
///
/// Returns [`SyncError::CursorRegression`] when the checkpoint is earlier
/// than `floor`, of a different cursor type, or an unparsable LSN.
pub fn ensure_monotonic(
    stream: &StreamName,
    floor: Option<&CursorValue>,
    checkpoint: &CursorValue,
) -> Result<(), SyncError> {
    let Some(floor) = floor else {
        return Ok(());
    };
    match checkpoint.compare(floor) {
        Ok(Ordering::Less) => Err(SyncError::CursorRegression {
            stream: stream.to_string(),
            detail: format!("checkpoint {checkpoint} is behind {floor}"),
        }),
        Ok(_) => Ok(()),
        Err(unordered) => Err(SyncError::CursorRegression {
            stream: stream.to_string(),
            detail: unordered.to_string(),
        }),
    }
}

/// What a completed stream persists to the cursor store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCommit {
    pub connection: ConnectionId,
    pub stream: StreamName,
    pub sync_mode: SyncMode,
    pub cursor_field: Option<String>,
    /// Last checkpoint acknowledged by the destination in this run.
    pub acknowledged: Option<CursorValue>,
    pub fingerprint: Option<String>,
    pub run: RunId,
}

/// Persist the outcome of a completed stream. Must only be called after the
/// destination committed the stream's writes.
///
/// Cursored streams with an acknowledged checkpoint get a full cursor
/// commit; everything else only refreshes the fingerprint. Returns `true`
/// when a cursor value was advanced.
///
/// # Errors
///
/// Returns a [`StateError`](conduit_state::StateError) on storage failure.
pub fn persist_stream_commit(
    state: &dyn StateBackend,
    commit: &StreamCommit,
    now: DateTime<Utc>,
) -> conduit_state::error::Result<bool> {
    if commit.sync_mode.is_cursored() {
        if let Some(value) = &commit.acknowledged {
            let cursor = CursorState {
                cursor_field: commit.cursor_field.clone(),
                cursor_value: Some(value.clone()),
                last_run_id: Some(commit.run),
                schema_fingerprint: commit.fingerprint.clone(),
                updated_at: now,
            };
            state.commit_cursor(&commit.connection, &commit.stream, &cursor)?;
            tracing::info!(
                connection = commit.connection.as_str(),
                stream = commit.stream.as_str(),
                cursor_value = %value,
                "Cursor advanced after destination commit"
            );
            return Ok(true);
        }
    }

    if let Some(fp) = &commit.fingerprint {
        state.record_fingerprint(&commit.connection, &commit.stream, fp, commit.run, now)?;
    }
    Ok(false)
}
