//! Identifiers and persisted replication state.
//!
//! Pure data types used by the state backend and the engine. Storage
//! formatting is the backend's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::CursorValue;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque connection identifier (a UUID string for engine-created connections).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for ConnectionId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Stream name, unique within a connection (e.g. `"public.users"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Create a new stream name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for StreamName {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Sync run identifier, assigned by the run history on creation.
///
/// Monotonically increasing, which doubles as the pagination cursor for
/// history listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Cursor state
// ---------------------------------------------------------------------------

/// Replication state for a (connection, stream) pair.
///
/// Created on the first successful sync of a stream and only advanced after
/// the data it describes has been acknowledged by the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    /// Column the cursor tracks (`None` for CDC and full-refresh streams).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_field: Option<String>,
    /// Last committed cursor position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_value: Option<CursorValue>,
    /// Run that last committed this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<RunId>,
    /// Fingerprint of the schema discovered by that run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_fingerprint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A cursor state together with the stream it belongs to, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCursor {
    pub stream: StreamName,
    #[serde(flatten)]
    pub state: CursorState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display_and_as_str() {
        let id = ConnectionId::new("conn-1");
        assert_eq!(id.as_str(), "conn-1");
        assert_eq!(id.to_string(), "conn-1");
    }

    #[test]
    fn generated_connection_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn stream_name_from_and_display() {
        let sn = StreamName::from("public.users");
        assert_eq!(sn.as_str(), "public.users");
        assert_eq!(sn.to_string(), "public.users");
    }

    #[test]
    fn run_id_orders_numerically() {
        assert!(RunId::new(9) < RunId::new(10));
        assert_eq!(serde_json::to_string(&RunId::new(42)).unwrap(), "42");
    }

    #[test]
    fn cursor_state_skips_absent_fields() {
        let state = CursorState {
            cursor_field: None,
            cursor_value: None,
            last_run_id: None,
            schema_fingerprint: Some("abc".into()),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("cursor_value").is_none());
        assert_eq!(json["schema_fingerprint"], "abc");
    }
}
