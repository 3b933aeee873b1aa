//! Connection and stream configuration types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ConnectionId, StreamName};
use crate::wire::{DestinationSyncMode, SchemaChangePolicy, SyncMode};

/// Lifecycle status of a connection.
///
/// `Syncing` doubles as the per-connection lock: it is only entered through a
/// compare-and-swap in the connection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Syncing,
    Paused,
    Error,
}

impl ConnectionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Syncing => "syncing",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "syncing" => Ok(Self::Syncing),
            "paused" => Ok(Self::Paused),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown connection status '{other}'")),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Per-stream replication settings within a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: StreamName,
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_field: Option<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub on_schema_change: SchemaChangePolicy,
}

impl StreamConfig {
    /// Whether replacing `self` with `next` invalidates the committed cursor.
    #[must_use]
    pub fn invalidates_cursor(&self, next: &StreamConfig) -> bool {
        self.sync_mode != next.sync_mode || self.cursor_field != next.cursor_field
    }
}

/// A configured source with its selected streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    /// Registry id of the connector kind.
    pub connector_kind: String,
    /// Opaque destination reference handed to the destination on each write.
    pub destination: String,
    /// Non-secret connector settings.
    #[serde(default)]
    pub config: serde_json::Value,
    pub status: ConnectionStatus,
    /// Set when a stream's discovered schema drifted from the last run.
    #[serde(default)]
    pub schema_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub streams: Vec<StreamConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    #[must_use]
    pub fn stream(&self, name: &StreamName) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| &s.name == name)
    }

    pub fn enabled_streams(&self) -> impl Iterator<Item = &StreamConfig> {
        self.streams.iter().filter(|s| s.enabled)
    }
}

/// Input for creating a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConnection {
    pub name: String,
    pub connector_kind: String,
    pub destination: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

/// Partial update of a connection. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streams: Option<Vec<StreamConfig>>,
}

impl ConnectionPatch {
    /// Whether the patch touches anything that a running sync depends on.
    #[must_use]
    pub fn touches_sync_inputs(&self) -> bool {
        self.destination.is_some() || self.config.is_some() || self.streams.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(json: serde_json::Value) -> StreamConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn stream_config_defaults() {
        let s = stream(serde_json::json!({
            "name": "users",
            "sync_mode": "full_refresh",
            "destination_sync_mode": "overwrite",
        }));
        assert!(s.enabled);
        assert!(s.primary_key.is_empty());
        assert_eq!(s.cursor_field, None);
        assert_eq!(s.on_schema_change, SchemaChangePolicy::Propagate);
    }

    #[test]
    fn cursor_invalidated_by_mode_or_field_change() {
        let base = stream(serde_json::json!({
            "name": "users",
            "sync_mode": "incremental",
            "destination_sync_mode": "append",
            "cursor_field": "updated_at",
        }));

        let mut renamed = base.clone();
        renamed.cursor_field = Some("id".into());
        assert!(base.invalidates_cursor(&renamed));

        let mut full = base.clone();
        full.sync_mode = SyncMode::FullRefresh;
        assert!(base.invalidates_cursor(&full));

        let mut disabled = base.clone();
        disabled.enabled = false;
        disabled.primary_key = vec!["id".into()];
        assert!(!base.invalidates_cursor(&disabled));
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            ConnectionStatus::Pending,
            ConnectionStatus::Active,
            ConnectionStatus::Syncing,
            ConnectionStatus::Paused,
            ConnectionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ConnectionStatus>().unwrap(), status);
        }
        assert!("running".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn patch_name_only_does_not_touch_sync_inputs() {
        let patch = ConnectionPatch {
            name: Some("renamed".into()),
            ..Default::default()
        };
        assert!(!patch.touches_sync_inputs());
        let patch = ConnectionPatch {
            config: Some(serde_json::json!({})),
            ..Default::default()
        };
        assert!(patch.touches_sync_inputs());
    }
}
