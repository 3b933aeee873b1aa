//! Stream discovery: one stream per `*.jsonl` file, columns inferred from a
//! sample of its lines.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::DateTime;
use conduit_types::catalog::{ColumnSchema, FieldType, StreamSchema};
use conduit_types::error::ConnectorError;
use conduit_types::wire::SyncMode;

use crate::config::validate_stream_name;

/// Lines inspected per file when inferring column types.
const SAMPLE_LINES: usize = 100;

pub(crate) const EXTENSION: &str = "jsonl";

/// List every stream under `root`, sorted by name.
pub fn discover_catalog(root: &Path) -> Result<Vec<StreamSchema>, ConnectorError> {
    let entries = std::fs::read_dir(root).map_err(|e| {
        ConnectorError::config(
            "ROOT_UNREADABLE",
            format!("cannot list '{}': {e}", root.display()),
        )
    })?;

    let mut streams = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ConnectorError::internal("READ_DIR", e.to_string()))?
            .path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if validate_stream_name(name).is_err() {
            tracing::warn!(file = %path.display(), "Skipping file with unusable stream name");
            continue;
        }
        let columns = infer_columns(&path)?;
        streams.push(StreamSchema {
            name: name.to_string(),
            columns,
            supported_sync_modes: vec![SyncMode::FullRefresh, SyncMode::Incremental],
            source_defined_cursor: None,
            source_defined_primary_key: None,
        });
    }
    streams.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(root = %root.display(), streams = streams.len(), "Discovered streams");
    Ok(streams)
}

#[derive(Debug, Clone, Copy)]
struct Observed {
    field_type: Option<FieldType>,
    nullable: bool,
    seen: usize,
}

fn infer_columns(path: &Path) -> Result<Vec<ColumnSchema>, ConnectorError> {
    let file = std::fs::File::open(path).map_err(|e| {
        ConnectorError::schema("STREAM_UNREADABLE", format!("{}: {e}", path.display()))
    })?;

    let mut observed: BTreeMap<String, Observed> = BTreeMap::new();
    let mut rows = 0usize;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ConnectorError::data("READ_FAILED", e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let serde_json::Value::Object(record) = serde_json::from_str(&line).map_err(|e| {
            ConnectorError::data(
                "INVALID_JSON",
                format!("{} line {}: {e}", path.display(), idx + 1),
            )
        })?
        else {
            return Err(ConnectorError::data(
                "NOT_AN_OBJECT",
                format!("{} line {}: expected a JSON object", path.display(), idx + 1),
            ));
        };

        for (name, value) in &record {
            let entry = observed.entry(name.clone()).or_insert(Observed {
                field_type: None,
                nullable: false,
                seen: 0,
            });
            entry.seen += 1;
            match value_type(value) {
                None => entry.nullable = true,
                Some(t) => entry.field_type = Some(merge(entry.field_type, t)),
            }
        }
        rows += 1;
        if rows >= SAMPLE_LINES {
            break;
        }
    }

    Ok(observed
        .into_iter()
        .map(|(name, o)| ColumnSchema {
            name,
            field_type: o.field_type.unwrap_or(FieldType::String),
            nullable: o.nullable || o.seen < rows,
        })
        .collect())
}

fn value_type(value: &serde_json::Value) -> Option<FieldType> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(_) => Some(FieldType::Boolean),
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Integer),
        serde_json::Value::Number(_) => Some(FieldType::Number),
        serde_json::Value::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => {
            Some(FieldType::Timestamp)
        }
        serde_json::Value::String(_) => Some(FieldType::String),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Some(FieldType::Json),
    }
}

/// Widen two observed types to one that fits both.
fn merge(current: Option<FieldType>, next: FieldType) -> FieldType {
    match (current, next) {
        (None, t) => t,
        (Some(a), b) if a == b => a,
        (Some(FieldType::Integer), FieldType::Number) | (Some(FieldType::Number), FieldType::Integer) => {
            FieldType::Number
        }
        (Some(FieldType::String), FieldType::Timestamp) | (Some(FieldType::Timestamp), FieldType::String) => {
            FieldType::String
        }
        _ => FieldType::Json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn one_stream_per_jsonl_file_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "users.jsonl", "{\"id\":1}\n");
        write(dir.path(), "orders.jsonl", "{\"id\":1}\n");
        write(dir.path(), "notes.txt", "ignored");

        let streams = discover_catalog(dir.path()).unwrap();
        let names: Vec<_> = streams.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "users"]);
        assert!(streams[0].supported_sync_modes.contains(&SyncMode::Incremental));
    }

    #[test]
    fn infers_types_and_nullability() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "events.jsonl",
            concat!(
                "{\"id\":1,\"amount\":2,\"at\":\"2024-01-01T00:00:00Z\",\"tag\":\"a\",\"meta\":{}}\n",
                "\n",
                "{\"id\":2,\"amount\":2.5,\"at\":\"2024-01-02T00:00:00Z\",\"tag\":null,\"meta\":[1]}\n",
                "{\"id\":3,\"amount\":1,\"at\":\"2024-01-03T00:00:00Z\",\"flag\":true,\"meta\":{}}\n",
            ),
        );

        let streams = discover_catalog(dir.path()).unwrap();
        let schema = &streams[0];
        let col = |n: &str| schema.column(n).unwrap().clone();

        assert_eq!(col("id").field_type, FieldType::Integer);
        assert!(!col("id").nullable);
        assert_eq!(col("amount").field_type, FieldType::Number);
        assert_eq!(col("at").field_type, FieldType::Timestamp);
        assert_eq!(col("tag").field_type, FieldType::String);
        assert!(col("tag").nullable);
        assert_eq!(col("flag").field_type, FieldType::Boolean);
        assert!(col("flag").nullable);
        assert_eq!(col("meta").field_type, FieldType::Json);
    }

    #[test]
    fn adding_a_column_changes_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "users.jsonl", "{\"id\":1}\n");
        let before = discover_catalog(dir.path()).unwrap()[0].fingerprint();
        write(dir.path(), "users.jsonl", "{\"id\":1,\"email\":\"a@b\"}\n");
        let after = discover_catalog(dir.path()).unwrap()[0].fingerprint();
        assert_ne!(before, after);
    }

    #[test]
    fn malformed_line_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.jsonl", "{\"id\":1}\n{oops\n");
        let err = discover_catalog(dir.path()).unwrap_err();
        assert_eq!(err.code, "INVALID_JSON");
        assert!(err.message.contains("line 2"));
    }

    #[test]
    fn type_widening() {
        assert_eq!(merge(Some(FieldType::Integer), FieldType::Number), FieldType::Number);
        assert_eq!(merge(Some(FieldType::Timestamp), FieldType::String), FieldType::String);
        assert_eq!(merge(Some(FieldType::Boolean), FieldType::Integer), FieldType::Json);
        assert_eq!(merge(None, FieldType::Boolean), FieldType::Boolean);
    }
}
