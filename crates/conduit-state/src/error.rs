//! State backend error types.

use conduit_types::state::RunId;

/// Errors produced by [`StateBackend`](crate::StateBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `SQLite` failure annotated with the operation that hit it.
    #[error("{context}: {source}")]
    SqliteContext {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A stored column holds a value this version does not understand.
    #[error("corrupt {column} value '{value}'")]
    Corrupt { column: &'static str, value: String },

    /// Attempted to rewrite a run that already reached a terminal status.
    #[error("run {0} is already finalized")]
    RunFinalized(RunId),

    /// Referenced run does not exist.
    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    pub(crate) fn backend(err: rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }

    pub(crate) fn backend_context(context: &'static str, source: rusqlite::Error) -> Self {
        Self::SqliteContext { context, source }
    }

    pub(crate) fn corrupt(column: &'static str, value: impl Into<String>) -> Self {
        Self::Corrupt {
            column,
            value: value.into(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("table not found".into()),
        );
        let err = StateError::Sqlite(inner);
        let msg = err.to_string();
        assert!(msg.contains("sqlite"), "got: {msg}");
    }

    #[test]
    fn context_prefixes_operation() {
        let err = StateError::backend_context("record_run: commit", rusqlite::Error::InvalidQuery);
        assert!(err.to_string().starts_with("record_run: commit: "));
    }

    #[test]
    fn lock_poisoned_displays() {
        let err = StateError::LockPoisoned;
        assert_eq!(err.to_string(), "state backend lock poisoned");
    }

    #[test]
    fn run_finalized_displays_id() {
        let err = StateError::RunFinalized(RunId::new(7));
        assert_eq!(err.to_string(), "run 7 is already finalized");
    }

    #[test]
    fn corrupt_names_column() {
        let err = StateError::corrupt("status", "bogus");
        assert_eq!(err.to_string(), "corrupt status value 'bogus'");
    }
}
