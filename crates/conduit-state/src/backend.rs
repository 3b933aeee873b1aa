//! Storage traits.
//!
//! Each store is a separate trait so tests can reason about one concern at a
//! time; [`StateBackend`] bundles them for use behind `Arc<dyn StateBackend>`.
//! All methods are blocking. Async callers go through `spawn_blocking`.

use chrono::{DateTime, Utc};
use conduit_types::connection::{Connection, ConnectionStatus};
use conduit_types::run::{StreamRunResult, SyncRun, TriggerMode};
use conduit_types::schedule::Schedule;
use conduit_types::state::{ConnectionId, CursorState, RunId, StreamCursor, StreamName};

use crate::error;

/// Result of a write guarded by a precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied.
    Applied,
    /// The target row does not exist.
    NotFound,
    /// The row exists but its current state forbids the write
    /// (connection syncing, run already terminal).
    Rejected,
}

/// Result of trying to take the per-connection sync lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Status moved to `syncing`; the caller owns the lock and must release it.
    Acquired {
        /// Status the connection held before the swap.
        previous: ConnectionStatus,
    },
    AlreadySyncing,
    Paused,
    NotFound,
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Storage contract for connections and the per-connection lock.
pub trait ConnectionStore: Send + Sync {
    /// Insert a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure,
    /// including a primary-key conflict.
    fn insert_connection(&self, connection: &Connection) -> error::Result<()>;

    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_connection(&self, id: &ConnectionId) -> error::Result<Option<Connection>>;

    /// All connections, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_connections(&self) -> error::Result<Vec<Connection>>;

    /// Overwrite the user-editable fields (name, destination, config, streams)
    /// and drop the cursors of `reset_streams`, in one transaction.
    ///
    /// Status, `schema_change` and the retained error are owned by the
    /// coordinator and are not touched. With `only_if_idle`, the write is
    /// rejected while the connection is `syncing`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn update_connection(
        &self,
        connection: &Connection,
        only_if_idle: bool,
        reset_streams: &[StreamName],
    ) -> error::Result<WriteOutcome>;

    /// Delete cursor state unless the connection is `syncing`, checked in the
    /// same transaction as the delete.
    ///
    /// With `stream` set only that stream's cursor goes. Otherwise every
    /// cursor goes and `schema_change` is cleared. Returns the outcome and how
    /// many cursors were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn reset_cursors_if_idle(
        &self,
        id: &ConnectionId,
        stream: Option<&StreamName>,
        now: DateTime<Utc>,
    ) -> error::Result<(WriteOutcome, u64)>;

    /// Delete a connection together with its cursors and schedule.
    ///
    /// Rejected while the connection is `syncing`. Run history is retained.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete_connection(&self, id: &ConnectionId) -> error::Result<WriteOutcome>;

    /// Compare-and-swap the status to `syncing` from anything but
    /// `syncing`/`paused`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn try_acquire_sync(
        &self,
        id: &ConnectionId,
        now: DateTime<Utc>,
    ) -> error::Result<AcquireOutcome>;

    /// Release the lock by writing a terminal status. No-op unless the
    /// connection is currently `syncing`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn release_sync(
        &self,
        id: &ConnectionId,
        status: ConnectionStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> error::Result<bool>;

    /// Administrative status change. Rejected while `syncing`.
    /// Moving to `active` clears the retained error message.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_status(
        &self,
        id: &ConnectionId,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> error::Result<WriteOutcome>;

    /// Set or clear the schema drift flag.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_schema_change(
        &self,
        id: &ConnectionId,
        schema_change: bool,
        now: DateTime<Utc>,
    ) -> error::Result<()>;
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

/// Storage contract for per-stream replication state.
pub trait CursorStore: Send + Sync {
    /// Read the current cursor for a (connection, stream) pair.
    ///
    /// Returns `Ok(None)` when no state has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_cursor(
        &self,
        connection: &ConnectionId,
        stream: &StreamName,
    ) -> error::Result<Option<CursorState>>;

    /// Upsert the full cursor state for a (connection, stream) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn commit_cursor(
        &self,
        connection: &ConnectionId,
        stream: &StreamName,
        state: &CursorState,
    ) -> error::Result<()>;

    /// Refresh only the schema fingerprint and last run, leaving the cursor
    /// value untouched (full-refresh streams).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn record_fingerprint(
        &self,
        connection: &ConnectionId,
        stream: &StreamName,
        fingerprint: &str,
        run: RunId,
        now: DateTime<Utc>,
    ) -> error::Result<()>;

    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_cursors(&self, connection: &ConnectionId) -> error::Result<Vec<StreamCursor>>;
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// Storage contract for connection schedules.
pub trait ScheduleStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_schedule(&self, connection: &ConnectionId) -> error::Result<Option<Schedule>>;

    /// Insert or replace a schedule.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn put_schedule(&self, schedule: &Schedule) -> error::Result<()>;

    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete_schedule(&self, connection: &ConnectionId) -> error::Result<bool>;

    /// Enabled schedules whose `next_run_at` is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_due(&self, now: DateTime<Utc>) -> error::Result<Vec<Schedule>>;

    /// Compare-and-swap `next_run_at` from `expected` to `next`.
    ///
    /// Returns `false` when another scheduler already advanced the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn claim_next_run(
        &self,
        connection: &ConnectionId,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> error::Result<bool>;

    /// Disable a schedule and clear its next run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn disable_schedule(&self, connection: &ConnectionId, now: DateTime<Utc>) -> error::Result<()>;
}

// ---------------------------------------------------------------------------
// Run history
// ---------------------------------------------------------------------------

/// Append-only storage for sync runs.
pub trait RunHistory: Send + Sync {
    /// Persist a new run in `pending`, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn create_run(
        &self,
        connection: &ConnectionId,
        trigger: TriggerMode,
        streams: &[StreamRunResult],
        now: DateTime<Utc>,
    ) -> error::Result<SyncRun>;

    /// Move a pending run to `running`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::RunFinalized`](crate::error::StateError::RunFinalized)
    /// if the run is terminal, or a storage error.
    fn mark_running(&self, id: RunId, started_at: DateTime<Utc>) -> error::Result<()>;

    /// Write the final state of a run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::RunFinalized`](crate::error::StateError::RunFinalized)
    /// if the stored run is already terminal,
    /// [`StateError::RunNotFound`](crate::error::StateError::RunNotFound) if it
    /// does not exist, or a storage error.
    fn record_run(&self, run: &SyncRun) -> error::Result<()>;

    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_run(&self, id: RunId) -> error::Result<Option<SyncRun>>;

    /// Runs for a connection, newest first, strictly older than `before`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_runs(
        &self,
        connection: &ConnectionId,
        limit: u32,
        before: Option<RunId>,
    ) -> error::Result<Vec<SyncRun>>;

    /// Flag a non-terminal run for cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn request_cancel(&self, id: RunId) -> error::Result<WriteOutcome>;

    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn cancel_requested(&self, id: RunId) -> error::Result<bool>;

    /// All runs still `pending` or `running`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_unfinished(&self) -> error::Result<Vec<SyncRun>>;
}

/// Every store the engine needs, usable as `Arc<dyn StateBackend>`.
pub trait StateBackend: ConnectionStore + CursorStore + ScheduleStore + RunHistory {}

impl<T> StateBackend for T where T: ConnectionStore + CursorStore + ScheduleStore + RunHistory {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn StateBackend`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn StateBackend) {}
    }
}
