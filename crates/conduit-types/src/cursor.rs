//! Cursor types for incremental sync position tracking.
//!
//! Cursors mark the last-replicated position in a source stream so the next
//! run resumes from there. Values are opaque to the engine except for their
//! ordering, which is used to reject regressing checkpoints.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data type of a cursor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorType {
    /// 64-bit signed integer cursor.
    Int64,
    /// UTC timestamp cursor.
    Timestamp,
    /// UTF-8 string cursor, ordered lexically.
    Utf8,
    /// Change-log position (`PostgreSQL` style `X/Y` hex LSN).
    Lsn,
}

impl fmt::Display for CursorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int64 => "int64",
            Self::Timestamp => "timestamp",
            Self::Utf8 => "utf8",
            Self::Lsn => "lsn",
        })
    }
}

/// Typed cursor position value.
///
/// Serialized as `{"type": "int64", "value": 42}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorValue {
    Int64 { value: i64 },
    Timestamp { value: DateTime<Utc> },
    Utf8 { value: String },
    Lsn { value: String },
}

/// Why two cursor values cannot be ordered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorOrderError {
    #[error("cannot compare {left} cursor with {right} cursor")]
    TypeMismatch { left: CursorType, right: CursorType },
    #[error("invalid lsn cursor '{value}': expected X/Y hex")]
    InvalidLsn { value: String },
}

impl CursorValue {
    #[must_use]
    pub fn cursor_type(&self) -> CursorType {
        match self {
            Self::Int64 { .. } => CursorType::Int64,
            Self::Timestamp { .. } => CursorType::Timestamp,
            Self::Utf8 { .. } => CursorType::Utf8,
            Self::Lsn { .. } => CursorType::Lsn,
        }
    }

    /// Order two positions of the same type.
    ///
    /// # Errors
    ///
    /// Returns [`CursorOrderError`] when the variants differ or an LSN is
    /// not `X/Y` hex.
    pub fn compare(&self, other: &Self) -> Result<Ordering, CursorOrderError> {
        match (self, other) {
            (Self::Int64 { value: a }, Self::Int64 { value: b }) => Ok(a.cmp(b)),
            (Self::Timestamp { value: a }, Self::Timestamp { value: b }) => Ok(a.cmp(b)),
            (Self::Utf8 { value: a }, Self::Utf8 { value: b }) => Ok(a.cmp(b)),
            (Self::Lsn { value: a }, Self::Lsn { value: b }) => {
                let invalid = |value: &str| CursorOrderError::InvalidLsn {
                    value: value.to_string(),
                };
                let a_pos = parse_lsn(a).ok_or_else(|| invalid(a))?;
                let b_pos = parse_lsn(b).ok_or_else(|| invalid(b))?;
                Ok(a_pos.cmp(&b_pos))
            }
            _ => Err(CursorOrderError::TypeMismatch {
                left: self.cursor_type(),
                right: other.cursor_type(),
            }),
        }
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 { value } => write!(f, "{value}"),
            Self::Timestamp { value } => write!(f, "{}", value.to_rfc3339()),
            Self::Utf8 { value } | Self::Lsn { value } => f.write_str(value),
        }
    }
}

/// Parse an `X/Y` hex log sequence number into a single ordinal.
fn parse_lsn(raw: &str) -> Option<u64> {
    let (hi, lo) = raw.split_once('/')?;
    let hi = u64::from_str_radix(hi, 16).ok()?;
    let lo = u64::from_str_radix(lo, 16).ok()?;
    if hi > u64::from(u32::MAX) || lo > u64::from(u32::MAX) {
        return None;
    }
    Some((hi << 32) | lo)
}
