//! Sync error model and retry backoff policy helpers.

use std::fmt;
use std::time::Duration;

use conduit_state::StateError;
use conduit_types::error::{BackoffClass, ConnectorError, ErrorCategory};

const BACKOFF_FAST_DIVISOR: u64 = 10;
const BACKOFF_SLOW_FACTOR: u64 = 5;

// ---------------------------------------------------------------------------
// SyncError: categorised errors surfaced by the engine
// ---------------------------------------------------------------------------

/// Why a lock-guarded operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// A sync for this connection is already running.
    AlreadyRunning,
    /// The connection is paused and accepts no triggers.
    Paused,
    /// The connection is syncing and cannot be reconfigured right now.
    Syncing,
    /// The run already reached a terminal status.
    RunFinished,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyRunning => "a sync is already running for this connection",
            Self::Paused => "connection is paused",
            Self::Syncing => "connection is syncing; retry once the run finishes",
            Self::RunFinished => "run has already finished",
        })
    }
}

/// What tripped a run's cancellation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// An operator asked for the run to stop.
    Operator,
    /// The run exceeded the maximum run duration.
    Timeout,
    /// A connection-level failure invalidated every stream.
    ConnectionError(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator => f.write_str("cancelled by operator"),
            Self::Timeout => f.write_str("sync exceeded maximum run duration"),
            Self::ConnectionError(msg) => write!(f, "connection error: {msg}"),
        }
    }
}

/// Errors produced by engine operations.
///
/// Stream-level variants are recorded on the stream's result and never abort
/// sibling streams; see [`SyncError::is_connection_level`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// One or more configuration problems, all reported together.
    #[error("validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),

    /// The per-connection lock or a run's state forbids the operation.
    #[error("{0}")]
    LockConflict(Rejected),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Retryable connector failure (timeouts, rate limits, transient I/O).
    #[error("transient connector error: {0}")]
    TransientConnector(ConnectorError),

    /// Non-retryable connector failure (config, auth, data).
    #[error("connector error: {0}")]
    FatalConnector(ConnectorError),

    /// The destination refused or failed a write.
    #[error("destination write failed: {0}")]
    DestinationWrite(ConnectorError),

    /// A checkpoint moved backwards relative to a committed or earlier cursor,
    /// or cannot be ordered against it.
    #[error("cursor regression on stream '{stream}': {detail}")]
    CursorRegression { stream: String, detail: String },

    /// Missing stream or schema drift under a `fail` policy.
    #[error("schema error on stream '{stream}': {message}")]
    Schema { stream: String, message: String },

    #[error("{0}")]
    Cancelled(CancelReason),

    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Host-side failure (panicked task, closed semaphore, I/O).
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl SyncError {
    pub(crate) fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify an error raised by a source connector.
    #[must_use]
    pub fn from_source(err: ConnectorError) -> Self {
        if err.retryable {
            Self::TransientConnector(err)
        } else {
            Self::FatalConnector(err)
        }
    }

    /// Classify an error raised by the destination.
    #[must_use]
    pub fn from_destination(err: ConnectorError) -> Self {
        if err.retryable {
            Self::TransientConnector(err)
        } else if err.category == ErrorCategory::Auth {
            Self::FatalConnector(err)
        } else {
            Self::DestinationWrite(err)
        }
    }

    /// Returns `true` if this is a connector error marked retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientConnector(_))
    }

    /// Whether this error invalidates every stream of the connection.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        match self {
            Self::FatalConnector(e) => e.is_connection_level(),
            _ => false,
        }
    }

    /// Returns the typed connector error, if any.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::TransientConnector(e) | Self::FatalConnector(e) | Self::DestinationWrite(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// In-worker retry budget for transient connector errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; reset after every acknowledged batch.
    pub max_retries: u32,
    /// Base delay for the `normal` backoff class.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

/// Compute retry delay based on error hints and attempt number (1-based).
#[must_use]
pub fn compute_backoff(err: &ConnectorError, attempt: u32, policy: &RetryPolicy) -> Duration {
    // A connector's retry_after hint wins, within the policy cap.
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms).min(policy.max_delay);
    }

    let normal_ms = u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX);
    let base_ms = match err.backoff_class {
        BackoffClass::Fast => normal_ms / BACKOFF_FAST_DIVISOR,
        BackoffClass::Normal => normal_ms,
        BackoffClass::Slow => normal_ms.saturating_mul(BACKOFF_SLOW_FACTOR),
    };

    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = Duration::from_millis(base_ms.saturating_mul(factor));
    delay.min(policy.max_delay)
}
