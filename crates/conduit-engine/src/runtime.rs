//! Contracts the engine consumes: source connectors, the destination and
//! credential resolution.

use std::fmt;

use async_trait::async_trait;
use conduit_types::catalog::StreamSchema;
use conduit_types::cursor::CursorValue;
use conduit_types::error::ConnectorError;
use conduit_types::record::{RecordBatch, WriteAck};
use conduit_types::state::{ConnectionId, RunId, StreamName};
use conduit_types::wire::{DestinationSyncMode, SyncMode};

/// Connection credentials. Never logged, persisted or placed in a run record.
#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// An empty secret, used for connector kinds without authentication.
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Borrow the secret value. Callers must not log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Everything a source connector needs to reach its system for one run.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub connection_id: ConnectionId,
    /// Non-secret connector settings from the connection.
    pub config: serde_json::Value,
    pub secret: Secret,
}

/// Parameters for reading one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub stream: StreamName,
    pub sync_mode: SyncMode,
    pub cursor_field: Option<String>,
    /// Resume position; `None` reads from the beginning.
    pub cursor: Option<CursorValue>,
}

/// Pull-based iterator over a stream's record batches.
#[async_trait]
pub trait BatchReader: Send {
    /// Next batch, or `None` once the stream is exhausted.
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, ConnectorError>;
}

/// Source connector contract.
#[async_trait]
pub trait ConnectorRuntime: Send + Sync {
    /// List the streams the source exposes.
    async fn discover(&self, source: &SourceContext) -> Result<Vec<StreamSchema>, ConnectorError>;

    /// Open a read of one stream. Reads must be restartable from any
    /// checkpoint previously returned on a batch.
    async fn read(
        &self,
        source: &SourceContext,
        request: ReadRequest,
    ) -> Result<Box<dyn BatchReader>, ConnectorError>;
}

/// Where and how one stream's records land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    /// Opaque destination reference from the connection.
    pub destination: String,
    pub connection_id: ConnectionId,
    pub stream: StreamName,
    pub mode: DestinationSyncMode,
    pub primary_key: Vec<String>,
    pub run_id: RunId,
}

/// Destination contract.
///
/// `begin` opens the stream's write (for `overwrite`, a fresh staging
/// partition); `commit` makes it visible; `abort` discards anything staged.
/// `append_dedup` writes must be idempotent upserts by primary key.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn begin(&self, target: &WriteTarget) -> Result<(), ConnectorError>;

    async fn write(
        &self,
        target: &WriteTarget,
        batch: &RecordBatch,
    ) -> Result<WriteAck, ConnectorError>;

    async fn commit(&self, target: &WriteTarget) -> Result<(), ConnectorError>;

    async fn abort(&self, target: &WriteTarget) -> Result<(), ConnectorError>;
}

/// Resolves a connection's credentials at the start of each run.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, connection: &ConnectionId) -> Result<Secret, ConnectorError>;
}

/// Reads credentials from environment variables named
/// `<prefix><CONNECTION_ID>` (upper-cased, non-alphanumerics as `_`).
#[derive(Debug, Clone)]
pub struct EnvCredentialResolver {
    prefix: String,
}

impl EnvCredentialResolver {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn var_name(&self, connection: &ConnectionId) -> String {
        let suffix: String = connection
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{suffix}", self.prefix)
    }
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, connection: &ConnectionId) -> Result<Secret, ConnectorError> {
        let var = self.var_name(connection);
        std::env::var(&var).map(Secret::new).map_err(|_| {
            ConnectorError::auth(
                "CREDENTIALS_MISSING",
                format!("no credentials found in environment variable {var}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        let ctx = SourceContext {
            connection_id: ConnectionId::new("c"),
            config: serde_json::json!({}),
            secret,
        };
        assert!(!format!("{ctx:?}").contains("hunter2"));
    }

    #[test]
    fn env_var_name_is_normalized() {
        let resolver = EnvCredentialResolver::new("CONDUIT_SECRET_");
        assert_eq!(
            resolver.var_name(&ConnectionId::new("ab-12.x")),
            "CONDUIT_SECRET_AB_12_X"
        );
    }

    #[tokio::test]
    async fn env_resolver_reads_and_reports_missing() {
        let resolver = EnvCredentialResolver::new("CONDUIT_TEST_SECRET_");
        std::env::set_var("CONDUIT_TEST_SECRET_PRESENT", "s3cret");
        let secret = resolver
            .resolve(&ConnectionId::new("present"))
            .await
            .unwrap();
        assert_eq!(secret.expose(), "s3cret");
        std::env::remove_var("CONDUIT_TEST_SECRET_PRESENT");

        let err = resolver
            .resolve(&ConnectionId::new("absent"))
            .await
            .unwrap_err();
        assert!(err.is_connection_level());
        assert!(err.message.contains("CONDUIT_TEST_SECRET_ABSENT"));
    }
}
