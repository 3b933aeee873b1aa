//! Cursor extraction from JSON records.

use chrono::{DateTime, Utc};
use conduit_types::cursor::CursorValue;
use conduit_types::error::ConnectorError;
use conduit_types::record::Record;

/// Typed cursor position of `record[field]`.
///
/// Integers become `int64`, RFC 3339 strings `timestamp`, other strings
/// `utf8`. Missing, null or non-scalar values are data errors.
pub fn extract(field: &str, record: &Record, line: usize) -> Result<CursorValue, ConnectorError> {
    match record.get(field) {
        None | Some(serde_json::Value::Null) => Err(ConnectorError::data(
            "CURSOR_MISSING",
            format!("line {line}: cursor field '{field}' is missing or null"),
        )),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(|value| CursorValue::Int64 { value })
            .ok_or_else(|| {
                ConnectorError::data(
                    "CURSOR_TYPE",
                    format!("line {line}: cursor field '{field}' is not an integer ({n})"),
                )
            }),
        Some(serde_json::Value::String(s)) => Ok(match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => CursorValue::Timestamp {
                value: ts.with_timezone(&Utc),
            },
            Err(_) => CursorValue::Utf8 { value: s.clone() },
        }),
        Some(other) => Err(ConnectorError::data(
            "CURSOR_TYPE",
            format!("line {line}: cursor field '{field}' has unsupported value {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[rstest]
    #[case(serde_json::json!({"c": 42}), CursorValue::Int64 { value: 42 })]
    #[case(serde_json::json!({"c": "abc"}), CursorValue::Utf8 { value: "abc".into() })]
    #[case(
        serde_json::json!({"c": "2024-01-15T10:00:00+02:00"}),
        CursorValue::Timestamp { value: "2024-01-15T08:00:00Z".parse().unwrap() }
    )]
    fn typed_extraction(#[case] row: serde_json::Value, #[case] expected: CursorValue) {
        assert_eq!(extract("c", &record(row), 1).unwrap(), expected);
    }

    #[rstest]
    #[case(serde_json::json!({}), "CURSOR_MISSING")]
    #[case(serde_json::json!({"c": null}), "CURSOR_MISSING")]
    #[case(serde_json::json!({"c": 1.5}), "CURSOR_TYPE")]
    #[case(serde_json::json!({"c": [1]}), "CURSOR_TYPE")]
    fn invalid_cursor_values(#[case] row: serde_json::Value, #[case] code: &str) {
        let err = extract("c", &record(row), 7).unwrap_err();
        assert_eq!(err.code, code);
        assert!(err.message.starts_with("line 7:"));
    }
}
