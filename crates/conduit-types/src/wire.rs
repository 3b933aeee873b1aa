//! Replication mode enums and connector capability flags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How data is read from a source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Read every record on every run.
    FullRefresh,
    /// Cursor-based reads of records changed since the last committed cursor.
    Incremental,
    /// Read the source's native change log.
    Cdc,
}

impl SyncMode {
    /// Whether this mode reads and commits a cursor.
    #[must_use]
    pub fn is_cursored(self) -> bool {
        matches!(self, Self::Incremental | Self::Cdc)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FullRefresh => "full_refresh",
            Self::Incremental => "incremental",
            Self::Cdc => "cdc",
        })
    }
}

/// How data is written to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    /// Replace the stream's destination partition each run.
    Overwrite,
    /// Insert all records (no deduplication).
    Append,
    /// Upsert by primary key; re-delivery of a record is idempotent.
    AppendDedup,
}

impl fmt::Display for DestinationSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overwrite => "overwrite",
            Self::Append => "append",
            Self::AppendDedup => "append_dedup",
        })
    }
}

/// What to do when a stream's discovered schema differs from the last run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaChangePolicy {
    /// Flag the connection and keep syncing.
    #[default]
    Propagate,
    /// Fail the stream until an operator reviews the change.
    Fail,
}

/// Capability flag declared by a connector kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Cursor-field incremental reads.
    Incremental,
    /// Change data capture.
    Cdc,
    /// Independent streams may be read concurrently.
    ConcurrentReads,
}

/// How a connector kind authenticates against its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    ApiKey,
    Basic,
    #[serde(rename = "oauth2")]
    OAuth2,
    ConnectionString,
}
