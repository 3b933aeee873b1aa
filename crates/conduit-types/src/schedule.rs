//! Schedule records owned by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ConnectionId;

/// Cron schedule for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub connection_id: ConnectionId,
    /// Five-field cron expression or `@` macro.
    pub cron: String,
    /// IANA timezone the expression is evaluated in.
    pub timezone: String,
    pub is_enabled: bool,
    /// Next instant the scheduler will fire. `None` when disabled or exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
