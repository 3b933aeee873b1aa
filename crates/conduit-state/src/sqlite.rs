//! `SQLite`-backed implementation of the state stores.
//!
//! Uses a single `Mutex<Connection>` for thread safety. Guarded writes are
//! expressed as conditional `UPDATE`s so they stay correct even when several
//! processes share one database file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_types::connection::{Connection, ConnectionStatus, StreamConfig};
use conduit_types::cursor::CursorValue;
use conduit_types::run::{RunStatus, StreamRunResult, SyncRun, TriggerMode};
use conduit_types::schedule::Schedule;
use conduit_types::state::{ConnectionId, CursorState, RunId, StreamCursor, StreamName};
use rusqlite::{Connection as SqlConnection, OptionalExtension};

use crate::backend::{
    AcquireOutcome, ConnectionStore, CursorStore, RunHistory, ScheduleStore, WriteOutcome,
};
use crate::error::{self, StateError};

/// Fixed-width UTC timestamp format. Lexical order equals chronological
/// order, which `list_due` and `claim_next_run` rely on.
const TIMESTAMP_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    connector_kind TEXT NOT NULL,
    destination TEXT NOT NULL,
    config_json TEXT NOT NULL,
    status TEXT NOT NULL,
    schema_change INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    streams_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stream_cursors (
    connection_id TEXT NOT NULL,
    stream TEXT NOT NULL,
    cursor_field TEXT,
    cursor_value TEXT,
    last_run_id INTEGER,
    schema_fingerprint TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (connection_id, stream)
);

CREATE TABLE IF NOT EXISTS schedules (
    connection_id TEXT PRIMARY KEY,
    cron TEXT NOT NULL,
    timezone TEXT NOT NULL,
    is_enabled INTEGER NOT NULL,
    next_run_at TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id TEXT NOT NULL,
    trigger_mode TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    records_synced INTEGER NOT NULL DEFAULT 0,
    bytes_synced INTEGER NOT NULL DEFAULT 0,
    streams_json TEXT NOT NULL,
    error_message TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_runs_connection ON sync_runs (connection_id, id);
CREATE INDEX IF NOT EXISTS idx_runs_status ON sync_runs (status);
CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (is_enabled, next_run_at);
";

const CONNECTION_COLUMNS: &str = "id, name, connector_kind, destination, config_json, status, \
     schema_change, error_message, streams_json, created_at, updated_at";

const RUN_COLUMNS: &str = "id, connection_id, trigger_mode, status, created_at, started_at, \
     completed_at, records_synced, bytes_synced, streams_json, error_message";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<SqlConnection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = SqlConnection::open(path).map_err(StateError::backend)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StateError::backend)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(StateError::backend)?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = SqlConnection::open_in_memory().map_err(StateError::backend)?;
        Self::init(conn)
    }

    fn init(conn: SqlConnection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, SqlConnection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

fn ts(dt: DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FMT).to_string()
}

fn parse_ts(column: &'static str, raw: &str) -> error::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StateError::corrupt(column, raw))
}

fn parse_opt_ts(column: &'static str, raw: Option<String>) -> error::Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(column, &r)).transpose()
}

#[allow(clippy::cast_possible_wrap)]
fn to_sql_count(value: u64) -> i64 {
    value as i64
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn connection_exists(conn: &SqlConnection, id: &ConnectionId) -> error::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM connections WHERE id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(StateError::backend)?;
    Ok(found.is_some())
}

fn connection_status(
    conn: &SqlConnection,
    id: &ConnectionId,
) -> error::Result<Option<ConnectionStatus>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM connections WHERE id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(StateError::backend)?;
    raw.map(|s| s.parse().map_err(|_| StateError::corrupt("status", s)))
        .transpose()
}

fn run_status(conn: &SqlConnection, id: RunId) -> error::Result<Option<RunStatus>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM sync_runs WHERE id = ?1",
            [id.get()],
            |row| row.get(0),
        )
        .optional()
        .map_err(StateError::backend)?;
    raw.map(|s| s.parse().map_err(|_| StateError::corrupt("status", s)))
        .transpose()
}

/// Raw `connections` row, decoded outside the rusqlite row closure so decode
/// failures surface as [`StateError`].
struct ConnectionRow {
    id: String,
    name: String,
    connector_kind: String,
    destination: String,
    config_json: String,
    status: String,
    schema_change: bool,
    error_message: Option<String>,
    streams_json: String,
    created_at: String,
    updated_at: String,
}

impl ConnectionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            connector_kind: row.get(2)?,
            destination: row.get(3)?,
            config_json: row.get(4)?,
            status: row.get(5)?,
            schema_change: row.get(6)?,
            error_message: row.get(7)?,
            streams_json: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn decode(self) -> error::Result<Connection> {
        let streams: Vec<StreamConfig> = serde_json::from_str(&self.streams_json)?;
        Ok(Connection {
            id: ConnectionId::new(self.id),
            name: self.name,
            connector_kind: self.connector_kind,
            destination: self.destination,
            config: serde_json::from_str(&self.config_json)?,
            status: self
                .status
                .parse()
                .map_err(|_| StateError::corrupt("status", &self.status))?,
            schema_change: self.schema_change,
            error_message: self.error_message,
            streams,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

struct CursorRow {
    stream: String,
    cursor_field: Option<String>,
    cursor_value: Option<String>,
    last_run_id: Option<i64>,
    schema_fingerprint: Option<String>,
    updated_at: String,
}

impl CursorRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            stream: row.get(0)?,
            cursor_field: row.get(1)?,
            cursor_value: row.get(2)?,
            last_run_id: row.get(3)?,
            schema_fingerprint: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn decode(self) -> error::Result<StreamCursor> {
        let cursor_value: Option<CursorValue> = self
            .cursor_value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(StreamCursor {
            stream: StreamName::new(self.stream),
            state: CursorState {
                cursor_field: self.cursor_field,
                cursor_value,
                last_run_id: self.last_run_id.map(RunId::new),
                schema_fingerprint: self.schema_fingerprint,
                updated_at: parse_ts("updated_at", &self.updated_at)?,
            },
        })
    }
}

struct ScheduleRow {
    connection_id: String,
    cron: String,
    timezone: String,
    is_enabled: bool,
    next_run_at: Option<String>,
    updated_at: String,
}

impl ScheduleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            connection_id: row.get(0)?,
            cron: row.get(1)?,
            timezone: row.get(2)?,
            is_enabled: row.get(3)?,
            next_run_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn decode(self) -> error::Result<Schedule> {
        Ok(Schedule {
            connection_id: ConnectionId::new(self.connection_id),
            cron: self.cron,
            timezone: self.timezone,
            is_enabled: self.is_enabled,
            next_run_at: parse_opt_ts("next_run_at", self.next_run_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

struct RunRow {
    id: i64,
    connection_id: String,
    trigger: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    records_synced: i64,
    bytes_synced: i64,
    streams_json: String,
    error_message: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            connection_id: row.get(1)?,
            trigger: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
            records_synced: row.get(7)?,
            bytes_synced: row.get(8)?,
            streams_json: row.get(9)?,
            error_message: row.get(10)?,
        })
    }

    fn decode(self) -> error::Result<SyncRun> {
        let streams: Vec<StreamRunResult> = serde_json::from_str(&self.streams_json)?;
        Ok(SyncRun {
            id: RunId::new(self.id),
            connection_id: ConnectionId::new(self.connection_id),
            trigger: self
                .trigger
                .parse::<TriggerMode>()
                .map_err(|_| StateError::corrupt("trigger_mode", &self.trigger))?,
            status: self
                .status
                .parse()
                .map_err(|_| StateError::corrupt("status", &self.status))?,
            created_at: parse_ts("created_at", &self.created_at)?,
            started_at: parse_opt_ts("started_at", self.started_at)?,
            completed_at: parse_opt_ts("completed_at", self.completed_at)?,
            records_synced: from_sql_count(self.records_synced),
            bytes_synced: from_sql_count(self.bytes_synced),
            streams,
            error: self.error_message,
        })
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

impl ConnectionStore for SqliteStateBackend {
    fn insert_connection(&self, connection: &Connection) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO connections ({CONNECTION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                connection.id.as_str(),
                connection.name,
                connection.connector_kind,
                connection.destination,
                serde_json::to_string(&connection.config)?,
                connection.status.as_str(),
                connection.schema_change,
                connection.error_message,
                serde_json::to_string(&connection.streams)?,
                ts(connection.created_at),
                ts(connection.updated_at),
            ],
        )
        .map_err(|e| StateError::backend_context("insert_connection", e))?;
        Ok(())
    }

    fn get_connection(&self, id: &ConnectionId) -> error::Result<Option<Connection>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?1"),
                [id.as_str()],
                ConnectionRow::from_row,
            )
            .optional()
            .map_err(StateError::backend)?;
        row.map(ConnectionRow::decode).transpose()
    }

    fn list_connections(&self) -> error::Result<Vec<Connection>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONNECTION_COLUMNS} FROM connections ORDER BY created_at, id"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([], ConnectionRow::from_row)
            .map_err(StateError::backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StateError::backend)?;
        rows.into_iter().map(ConnectionRow::decode).collect()
    }

    fn update_connection(
        &self,
        connection: &Connection,
        only_if_idle: bool,
        reset_streams: &[StreamName],
    ) -> error::Result<WriteOutcome> {
        let conn = self.lock_conn()?;
        let guard = if only_if_idle {
            " AND status != 'syncing'"
        } else {
            ""
        };
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("update_connection: begin tx", e))?;
        let updated = tx
            .execute(
                &format!(
                    "UPDATE connections SET name = ?1, destination = ?2, config_json = ?3, \
                     streams_json = ?4, updated_at = ?5 WHERE id = ?6{guard}"
                ),
                rusqlite::params![
                    connection.name,
                    connection.destination,
                    serde_json::to_string(&connection.config)?,
                    serde_json::to_string(&connection.streams)?,
                    ts(connection.updated_at),
                    connection.id.as_str(),
                ],
            )
            .map_err(|e| StateError::backend_context("update_connection", e))?;
        if updated > 0 {
            for stream in reset_streams {
                tx.execute(
                    "DELETE FROM stream_cursors WHERE connection_id = ?1 AND stream = ?2",
                    rusqlite::params![connection.id.as_str(), stream.as_str()],
                )
                .map_err(|e| StateError::backend_context("update_connection: reset cursor", e))?;
            }
            tx.commit()
                .map_err(|e| StateError::backend_context("update_connection: commit", e))?;
            return Ok(WriteOutcome::Applied);
        }
        drop(tx);
        if connection_exists(&conn, &connection.id)? {
            Ok(WriteOutcome::Rejected)
        } else {
            Ok(WriteOutcome::NotFound)
        }
    }

    fn delete_connection(&self, id: &ConnectionId) -> error::Result<WriteOutcome> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("delete_connection: begin tx", e))?;
        let deleted = tx
            .execute(
                "DELETE FROM connections WHERE id = ?1 AND status != 'syncing'",
                [id.as_str()],
            )
            .map_err(|e| StateError::backend_context("delete_connection: delete", e))?;
        if deleted == 0 {
            drop(tx);
            return if connection_exists(&conn, id)? {
                Ok(WriteOutcome::Rejected)
            } else {
                Ok(WriteOutcome::NotFound)
            };
        }
        tx.execute(
            "DELETE FROM stream_cursors WHERE connection_id = ?1",
            [id.as_str()],
        )
        .map_err(|e| StateError::backend_context("delete_connection: cursors", e))?;
        tx.execute(
            "DELETE FROM schedules WHERE connection_id = ?1",
            [id.as_str()],
        )
        .map_err(|e| StateError::backend_context("delete_connection: schedule", e))?;
        tx.commit()
            .map_err(|e| StateError::backend_context("delete_connection: commit", e))?;
        Ok(WriteOutcome::Applied)
    }

    fn try_acquire_sync(
        &self,
        id: &ConnectionId,
        now: DateTime<Utc>,
    ) -> error::Result<AcquireOutcome> {
        let conn = self.lock_conn()?;
        let Some(previous) = connection_status(&conn, id)? else {
            return Ok(AcquireOutcome::NotFound);
        };
        match previous {
            ConnectionStatus::Syncing => return Ok(AcquireOutcome::AlreadySyncing),
            ConnectionStatus::Paused => return Ok(AcquireOutcome::Paused),
            _ => {}
        }
        let swapped = conn
            .execute(
                "UPDATE connections SET status = 'syncing', updated_at = ?1 \
                 WHERE id = ?2 AND status = ?3",
                rusqlite::params![ts(now), id.as_str(), previous.as_str()],
            )
            .map_err(|e| StateError::backend_context("try_acquire_sync", e))?;
        if swapped == 1 {
            return Ok(AcquireOutcome::Acquired { previous });
        }
        // Another process changed the status between our read and the swap.
        Ok(match connection_status(&conn, id)? {
            None => AcquireOutcome::NotFound,
            Some(ConnectionStatus::Paused) => AcquireOutcome::Paused,
            Some(_) => AcquireOutcome::AlreadySyncing,
        })
    }

    fn release_sync(
        &self,
        id: &ConnectionId,
        status: ConnectionStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let released = conn
            .execute(
                "UPDATE connections SET status = ?1, error_message = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND status = 'syncing'",
                rusqlite::params![status.as_str(), error_message, ts(now), id.as_str()],
            )
            .map_err(|e| StateError::backend_context("release_sync", e))?;
        Ok(released > 0)
    }

    fn set_status(
        &self,
        id: &ConnectionId,
        status: ConnectionStatus,
        now: DateTime<Utc>,
    ) -> error::Result<WriteOutcome> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE connections SET status = ?1, \
                 error_message = CASE WHEN ?1 = 'active' THEN NULL ELSE error_message END, \
                 updated_at = ?2 WHERE id = ?3 AND status != 'syncing'",
                rusqlite::params![status.as_str(), ts(now), id.as_str()],
            )
            .map_err(|e| StateError::backend_context("set_status", e))?;
        if updated > 0 {
            return Ok(WriteOutcome::Applied);
        }
        if connection_exists(&conn, id)? {
            Ok(WriteOutcome::Rejected)
        } else {
            Ok(WriteOutcome::NotFound)
        }
    }

    fn set_schema_change(
        &self,
        id: &ConnectionId,
        schema_change: bool,
        now: DateTime<Utc>,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE connections SET schema_change = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![schema_change, ts(now), id.as_str()],
        )
        .map_err(|e| StateError::backend_context("set_schema_change", e))?;
        Ok(())
    }

    fn reset_cursors_if_idle(
        &self,
        id: &ConnectionId,
        stream: Option<&StreamName>,
        now: DateTime<Utc>,
    ) -> error::Result<(WriteOutcome, u64)> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("reset_cursors: begin tx", e))?;
        // The guarded touch doubles as the idle check; whole-connection
        // resets also clear the drift flag.
        let touched = tx
            .execute(
                "UPDATE connections SET \
                 schema_change = CASE WHEN ?1 THEN 0 ELSE schema_change END, \
                 updated_at = ?2 WHERE id = ?3 AND status != 'syncing'",
                rusqlite::params![stream.is_none(), ts(now), id.as_str()],
            )
            .map_err(|e| StateError::backend_context("reset_cursors: guard", e))?;
        if touched == 0 {
            drop(tx);
            return if connection_exists(&conn, id)? {
                Ok((WriteOutcome::Rejected, 0))
            } else {
                Ok((WriteOutcome::NotFound, 0))
            };
        }
        let removed = match stream {
            Some(stream) => tx.execute(
                "DELETE FROM stream_cursors WHERE connection_id = ?1 AND stream = ?2",
                rusqlite::params![id.as_str(), stream.as_str()],
            ),
            None => tx.execute(
                "DELETE FROM stream_cursors WHERE connection_id = ?1",
                [id.as_str()],
            ),
        }
        .map_err(|e| StateError::backend_context("reset_cursors: delete", e))?;
        tx.commit()
            .map_err(|e| StateError::backend_context("reset_cursors: commit", e))?;
        Ok((WriteOutcome::Applied, removed as u64))
    }
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

impl CursorStore for SqliteStateBackend {
    fn get_cursor(
        &self,
        connection: &ConnectionId,
        stream: &StreamName,
    ) -> error::Result<Option<CursorState>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT stream, cursor_field, cursor_value, last_run_id, schema_fingerprint, \
                 updated_at FROM stream_cursors WHERE connection_id = ?1 AND stream = ?2",
                rusqlite::params![connection.as_str(), stream.as_str()],
                CursorRow::from_row,
            )
            .optional()
            .map_err(StateError::backend)?;
        Ok(row.map(CursorRow::decode).transpose()?.map(|c| c.state))
    }

    fn commit_cursor(
        &self,
        connection: &ConnectionId,
        stream: &StreamName,
        state: &CursorState,
    ) -> error::Result<()> {
        let cursor_value = state
            .cursor_value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO stream_cursors \
             (connection_id, stream, cursor_field, cursor_value, last_run_id, schema_fingerprint, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(connection_id, stream) DO UPDATE SET \
             cursor_field = ?3, cursor_value = ?4, last_run_id = ?5, \
             schema_fingerprint = ?6, updated_at = ?7",
            rusqlite::params![
                connection.as_str(),
                stream.as_str(),
                state.cursor_field,
                cursor_value,
                state.last_run_id.map(RunId::get),
                state.schema_fingerprint,
                ts(state.updated_at),
            ],
        )
        .map_err(|e| StateError::backend_context("commit_cursor", e))?;
        Ok(())
    }

    fn record_fingerprint(
        &self,
        connection: &ConnectionId,
        stream: &StreamName,
        fingerprint: &str,
        run: RunId,
        now: DateTime<Utc>,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO stream_cursors \
             (connection_id, stream, last_run_id, schema_fingerprint, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(connection_id, stream) DO UPDATE SET \
             last_run_id = ?3, schema_fingerprint = ?4, updated_at = ?5",
            rusqlite::params![
                connection.as_str(),
                stream.as_str(),
                run.get(),
                fingerprint,
                ts(now),
            ],
        )
        .map_err(|e| StateError::backend_context("record_fingerprint", e))?;
        Ok(())
    }

    fn list_cursors(&self, connection: &ConnectionId) -> error::Result<Vec<StreamCursor>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT stream, cursor_field, cursor_value, last_run_id, schema_fingerprint, \
                 updated_at FROM stream_cursors WHERE connection_id = ?1 ORDER BY stream",
            )
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([connection.as_str()], CursorRow::from_row)
            .map_err(StateError::backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StateError::backend)?;
        rows.into_iter().map(CursorRow::decode).collect()
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

impl ScheduleStore for SqliteStateBackend {
    fn get_schedule(&self, connection: &ConnectionId) -> error::Result<Option<Schedule>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT connection_id, cron, timezone, is_enabled, next_run_at, updated_at \
                 FROM schedules WHERE connection_id = ?1",
                [connection.as_str()],
                ScheduleRow::from_row,
            )
            .optional()
            .map_err(StateError::backend)?;
        row.map(ScheduleRow::decode).transpose()
    }

    fn put_schedule(&self, schedule: &Schedule) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO schedules (connection_id, cron, timezone, is_enabled, next_run_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(connection_id) DO UPDATE SET \
             cron = ?2, timezone = ?3, is_enabled = ?4, next_run_at = ?5, updated_at = ?6",
            rusqlite::params![
                schedule.connection_id.as_str(),
                schedule.cron,
                schedule.timezone,
                schedule.is_enabled,
                schedule.next_run_at.map(ts),
                ts(schedule.updated_at),
            ],
        )
        .map_err(|e| StateError::backend_context("put_schedule", e))?;
        Ok(())
    }

    fn delete_schedule(&self, connection: &ConnectionId) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM schedules WHERE connection_id = ?1",
                [connection.as_str()],
            )
            .map_err(|e| StateError::backend_context("delete_schedule", e))?;
        Ok(deleted > 0)
    }

    fn list_due(&self, now: DateTime<Utc>) -> error::Result<Vec<Schedule>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT connection_id, cron, timezone, is_enabled, next_run_at, updated_at \
                 FROM schedules WHERE is_enabled = 1 AND next_run_at IS NOT NULL \
                 AND next_run_at <= ?1 ORDER BY next_run_at, connection_id",
            )
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([ts(now)], ScheduleRow::from_row)
            .map_err(StateError::backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StateError::backend)?;
        rows.into_iter().map(ScheduleRow::decode).collect()
    }

    fn claim_next_run(
        &self,
        connection: &ConnectionId,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let swapped = conn
            .execute(
                "UPDATE schedules SET next_run_at = ?1, updated_at = ?2 \
                 WHERE connection_id = ?3 AND is_enabled = 1 AND next_run_at = ?4",
                rusqlite::params![next.map(ts), ts(now), connection.as_str(), ts(expected)],
            )
            .map_err(|e| StateError::backend_context("claim_next_run", e))?;
        Ok(swapped == 1)
    }

    fn disable_schedule(&self, connection: &ConnectionId, now: DateTime<Utc>) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE schedules SET is_enabled = 0, next_run_at = NULL, updated_at = ?1 \
             WHERE connection_id = ?2",
            rusqlite::params![ts(now), connection.as_str()],
        )
        .map_err(|e| StateError::backend_context("disable_schedule", e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Run history
// ---------------------------------------------------------------------------

impl RunHistory for SqliteStateBackend {
    fn create_run(
        &self,
        connection: &ConnectionId,
        trigger: TriggerMode,
        streams: &[StreamRunResult],
        now: DateTime<Utc>,
    ) -> error::Result<SyncRun> {
        let streams_json = serde_json::to_string(streams)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_runs (connection_id, trigger_mode, status, created_at, streams_json) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                connection.as_str(),
                trigger.as_str(),
                RunStatus::Pending.as_str(),
                ts(now),
                streams_json,
            ],
        )
        .map_err(|e| StateError::backend_context("create_run", e))?;
        Ok(SyncRun {
            id: RunId::new(conn.last_insert_rowid()),
            connection_id: connection.clone(),
            trigger,
            status: RunStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            records_synced: 0,
            bytes_synced: 0,
            streams: streams.to_vec(),
            error: None,
        })
    }

    fn mark_running(&self, id: RunId, started_at: DateTime<Utc>) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE sync_runs SET status = 'running', started_at = ?1 \
                 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![ts(started_at), id.get()],
            )
            .map_err(|e| StateError::backend_context("mark_running", e))?;
        if updated > 0 {
            return Ok(());
        }
        match run_status(&conn, id)? {
            None => Err(StateError::RunNotFound(id)),
            Some(status) if status.is_terminal() => Err(StateError::RunFinalized(id)),
            Some(_) => Ok(()),
        }
    }

    fn record_run(&self, run: &SyncRun) -> error::Result<()> {
        let streams_json = serde_json::to_string(&run.streams)?;
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE sync_runs SET status = ?1, started_at = ?2, completed_at = ?3, \
                 records_synced = ?4, bytes_synced = ?5, streams_json = ?6, error_message = ?7 \
                 WHERE id = ?8 AND status IN ('pending', 'running')",
                rusqlite::params![
                    run.status.as_str(),
                    run.started_at.map(ts),
                    run.completed_at.map(ts),
                    to_sql_count(run.records_synced),
                    to_sql_count(run.bytes_synced),
                    streams_json,
                    run.error,
                    run.id.get(),
                ],
            )
            .map_err(|e| StateError::backend_context("record_run", e))?;
        if updated > 0 {
            return Ok(());
        }
        match run_status(&conn, run.id)? {
            None => Err(StateError::RunNotFound(run.id)),
            Some(_) => Err(StateError::RunFinalized(run.id)),
        }
    }

    fn get_run(&self, id: RunId) -> error::Result<Option<SyncRun>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?1"),
                [id.get()],
                RunRow::from_row,
            )
            .optional()
            .map_err(StateError::backend)?;
        row.map(RunRow::decode).transpose()
    }

    fn list_runs(
        &self,
        connection: &ConnectionId,
        limit: u32,
        before: Option<RunId>,
    ) -> error::Result<Vec<SyncRun>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM sync_runs \
                 WHERE connection_id = ?1 AND (?2 IS NULL OR id < ?2) \
                 ORDER BY id DESC LIMIT ?3"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(
                rusqlite::params![connection.as_str(), before.map(RunId::get), limit],
                RunRow::from_row,
            )
            .map_err(StateError::backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StateError::backend)?;
        rows.into_iter().map(RunRow::decode).collect()
    }

    fn request_cancel(&self, id: RunId) -> error::Result<WriteOutcome> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE sync_runs SET cancel_requested = 1 \
                 WHERE id = ?1 AND status IN ('pending', 'running')",
                [id.get()],
            )
            .map_err(|e| StateError::backend_context("request_cancel", e))?;
        if updated > 0 {
            return Ok(WriteOutcome::Applied);
        }
        Ok(match run_status(&conn, id)? {
            None => WriteOutcome::NotFound,
            Some(_) => WriteOutcome::Rejected,
        })
    }

    fn cancel_requested(&self, id: RunId) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let flag: Option<bool> = conn
            .query_row(
                "SELECT cancel_requested FROM sync_runs WHERE id = ?1",
                [id.get()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::backend)?;
        Ok(flag.unwrap_or(false))
    }

    fn list_unfinished(&self) -> error::Result<Vec<SyncRun>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM sync_runs \
                 WHERE status IN ('pending', 'running') ORDER BY id"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([], RunRow::from_row)
            .map_err(StateError::backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StateError::backend)?;
        rows.into_iter().map(RunRow::decode).collect()
    }
}
