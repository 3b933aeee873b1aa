//! Stream catalog and schema types.
//!
//! A source connector's `discover` returns one [`StreamSchema`] per stream it
//! exposes. The engine only inspects schemas to fingerprint them for drift
//! detection and to check that configured streams still exist.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::wire::SyncMode;

/// Logical field type reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Timestamp,
    Json,
}

impl FieldType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
        }
    }
}

/// Column definition within a stream schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// A discoverable stream exposed by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub supported_sync_modes: Vec<SyncMode>,
    /// Source-defined cursor column for incremental sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_defined_cursor: Option<String>,
    /// Source-defined primary key columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_defined_primary_key: Option<Vec<String>>,
}

impl StreamSchema {
    /// SHA-256 over the sorted `(name, type, nullable)` column set.
    ///
    /// Column order does not affect the fingerprint; names, types and
    /// nullability do.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut columns: Vec<&ColumnSchema> = self.columns.iter().collect();
        columns.sort_by(|a, b| a.name.cmp(&b.name));

        let mut hasher = Sha256::new();
        for col in columns {
            hasher.update(col.name.as_bytes());
            hasher.update([0]);
            hasher.update(col.field_type.as_str().as_bytes());
            hasher.update([u8::from(col.nullable)]);
            hasher.update([0xff]);
        }
        format!("{:x}", hasher.finalize())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}
