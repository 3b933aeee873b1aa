//! Destination that lands streams in a `SQLite` database.
//!
//! Every stream gets a table `<destination>__<stream>` holding one JSON
//! document per row, tagged with the owning connection. Overwrites and
//! upserts only touch the committing connection's rows. Writes go to a per-run staging table first; `commit`
//! publishes them in a single transaction, so a failed or cancelled run
//! never leaves partial rows behind.

pub mod ddl;
mod loader;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conduit_engine::runtime::{Destination, WriteTarget};
use conduit_types::error::ConnectorError;
use conduit_types::record::{Record, RecordBatch, WriteAck};
use conduit_types::state::ConnectionId;
use rusqlite::{Connection, ErrorCode};

/// Map a `SQLite` failure onto the connector error model. Lock contention is
/// transient, everything else is a destination failure.
pub(crate) fn sql_error(context: &str, err: rusqlite::Error) -> ConnectorError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            ConnectorError::transient_db("SQLITE_BUSY", format!("{context}: {err}"))
        }
        _ => ConnectorError::destination("SQLITE_ERROR", format!("{context}: {err}")),
    }
}

/// `SQLite`-backed [`Destination`].
#[derive(Clone)]
pub struct SqliteDestination {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDestination").finish_non_exhaustive()
    }
}

impl SqliteDestination {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, ConnectorError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ConnectorError::config(
                        "DESTINATION_PATH",
                        format!("cannot create {}: {e}", parent.display()),
                    )
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| sql_error("open destination", e))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| sql_error("set busy timeout", e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| sql_error("enable WAL", e))?;
        Ok(Self::from_connection(conn))
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self, ConnectorError> {
        let conn = Connection::open_in_memory().map_err(|e| sql_error("open destination", e))?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, ConnectorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ConnectorError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| ConnectorError::internal("LOCK_POISONED", "destination lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| ConnectorError::internal("TASK_FAILED", format!("destination task failed: {e}")))?
    }

    /// Committed rows of one stream, in insertion order.
    pub async fn rows(&self, destination: &str, stream: &str) -> Result<Vec<Record>, ConnectorError> {
        let table = ddl::table_name(destination, stream)?;
        self.with_conn(move |conn| loader::read_table(conn, &table, None))
            .await
    }

    /// Committed rows of one stream written by `connection`.
    pub async fn connection_rows(
        &self,
        destination: &str,
        connection: &ConnectionId,
        stream: &str,
    ) -> Result<Vec<Record>, ConnectorError> {
        let table = ddl::table_name(destination, stream)?;
        let connection = connection.to_string();
        self.with_conn(move |conn| loader::read_table(conn, &table, Some(&connection)))
            .await
    }
}

#[async_trait]
impl Destination for SqliteDestination {
    async fn begin(&self, target: &WriteTarget) -> Result<(), ConnectorError> {
        let table = ddl::target_table(target)?;
        let staging = ddl::staging_table(target)?;
        self.with_conn(move |conn| {
            ddl::ensure_target(conn, &table)?;
            ddl::prepare_staging(conn, &staging)
        })
        .await
    }

    async fn write(
        &self,
        target: &WriteTarget,
        batch: &RecordBatch,
    ) -> Result<WriteAck, ConnectorError> {
        let target = target.clone();
        let batch = batch.clone();
        self.with_conn(move |conn| loader::stage_batch(conn, &target, &batch))
            .await
    }

    async fn commit(&self, target: &WriteTarget) -> Result<(), ConnectorError> {
        let owned = target.clone();
        let rows = self
            .with_conn(move |conn| loader::publish(conn, &owned))
            .await?;
        tracing::debug!(
            connection = target.connection_id.as_str(),
            stream = target.stream.as_str(),
            rows,
            "Committed stream"
        );
        Ok(())
    }

    async fn abort(&self, target: &WriteTarget) -> Result<(), ConnectorError> {
        let staging = ddl::staging_table(target)?;
        self.with_conn(move |conn| ddl::drop_staging(conn, &staging))
            .await?;
        tracing::debug!(
            connection = target.connection_id.as_str(),
            stream = target.stream.as_str(),
            "Discarded staged rows"
        );
        Ok(())
    }
}
