//! Sync run records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::CursorValue;
use crate::state::{ConnectionId, RunId, StreamName};

/// Overall status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal runs are immutable.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// Status of one stream within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Not started, or interrupted by cancellation or a connection-level error.
    Skipped,
}

impl StreamRunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StreamRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Scheduled,
    Manual,
}

impl TriggerMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown trigger mode '{other}'")),
        }
    }
}

/// Per-stream outcome within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRunResult {
    pub name: StreamName,
    pub status: StreamRunStatus,
    pub records: u64,
    pub bytes: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_before: Option<CursorValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_after: Option<CursorValue>,
}

impl StreamRunResult {
    #[must_use]
    pub fn pending(name: StreamName) -> Self {
        Self {
            name,
            status: StreamRunStatus::Pending,
            records: 0,
            bytes: 0,
            attempts: 0,
            error: None,
            cursor_before: None,
            cursor_after: None,
        }
    }
}

/// One execution of a connection's sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: RunId,
    pub connection_id: ConnectionId,
    pub trigger: TriggerMode,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub records_synced: u64,
    pub bytes_synced: u64,
    pub streams: Vec<StreamRunResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncRun {
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamRunResult> {
        self.streams.iter().find(|s| s.name.as_str() == name)
    }

    /// Recompute the aggregate counters from the per-stream results.
    pub fn recompute_totals(&mut self) {
        self.records_synced = self.streams.iter().map(|s| s.records).sum();
        self.bytes_synced = self.streams.iter().map(|s| s.bytes).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(StreamRunStatus::Skipped.is_terminal());
        assert!(!StreamRunStatus::Running.is_terminal());
    }

    #[test]
    fn totals_sum_stream_counters() {
        let mut a = StreamRunResult::pending(StreamName::new("a"));
        a.records = 3;
        a.bytes = 30;
        let mut b = StreamRunResult::pending(StreamName::new("b"));
        b.records = 2;
        b.bytes = 5;
        let mut run = SyncRun {
            id: RunId::new(1),
            connection_id: ConnectionId::new("c"),
            trigger: TriggerMode::Manual,
            status: RunStatus::Running,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            records_synced: 0,
            bytes_synced: 0,
            streams: vec![a, b],
            error: None,
        };
        run.recompute_totals();
        assert_eq!(run.records_synced, 5);
        assert_eq!(run.bytes_synced, 35);
        assert_eq!(run.stream("b").unwrap().records, 2);
    }

    #[test]
    fn run_status_parses() {
        assert_eq!("cancelled".parse::<RunStatus>().unwrap(), RunStatus::Cancelled);
        assert_eq!("manual".parse::<TriggerMode>().unwrap(), TriggerMode::Manual);
        assert!("done".parse::<RunStatus>().is_err());
    }
}
