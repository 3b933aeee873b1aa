//! Live run state shared between a run's workers and its observers.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use conduit_types::cursor::CursorValue;
use conduit_types::run::{StreamRunResult, StreamRunStatus, SyncRun};
use tokio_util::sync::CancellationToken;

use crate::errors::CancelReason;

/// Mutable snapshot of an in-flight run. Workers update their own stream's
/// entry; readers take consistent copies.
#[derive(Debug)]
pub struct RunProgress {
    run: Mutex<SyncRun>,
}

impl RunProgress {
    #[must_use]
    pub fn new(run: SyncRun) -> Self {
        Self {
            run: Mutex::new(run),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncRun> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_stream(&self, stream: &str, f: impl FnOnce(&mut StreamRunResult)) {
        let mut run = self.lock();
        if let Some(s) = run.streams.iter_mut().find(|s| s.name.as_str() == stream) {
            f(s);
        }
    }

    pub fn start_stream(&self, stream: &str) {
        self.with_stream(stream, |s| s.status = StreamRunStatus::Running);
    }

    /// Count an acknowledged batch.
    pub fn add_written(&self, stream: &str, records: u64, bytes: u64) {
        self.with_stream(stream, |s| {
            s.records += records;
            s.bytes += bytes;
        });
    }

    /// Drop a stream's counters after its staged writes were discarded.
    pub fn reset_counts(&self, stream: &str) {
        self.with_stream(stream, |s| {
            s.records = 0;
            s.bytes = 0;
        });
    }

    pub fn set_attempts(&self, stream: &str, attempts: u32) {
        self.with_stream(stream, |s| s.attempts = attempts);
    }

    /// Move a stream to a terminal status. A stream that already finished is
    /// left alone.
    pub fn finish_stream(
        &self,
        stream: &str,
        status: StreamRunStatus,
        error: Option<String>,
        cursor_after: Option<CursorValue>,
    ) {
        self.with_stream(stream, |s| {
            if s.status.is_terminal() {
                return;
            }
            s.status = status;
            s.error = error;
            if cursor_after.is_some() {
                s.cursor_after = cursor_after;
            }
        });
    }

    /// Copy of the run with aggregate counters brought up to date.
    #[must_use]
    pub fn snapshot(&self) -> SyncRun {
        let mut run = self.lock().clone();
        run.recompute_totals();
        run
    }
}

/// Cooperative cancellation for one run. The first reason recorded wins.
#[derive(Debug, Default)]
pub struct RunControl {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: CancelReason) {
        if self.reason.set(reason.clone()).is_ok() {
            tracing::debug!(reason = %reason, "Run cancellation requested");
        }
        self.token.cancel();
    }

    #[must_use]
    pub fn reason(&self) -> Option<&CancelReason> {
        self.reason.get()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
