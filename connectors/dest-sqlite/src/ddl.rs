//! Table naming and DDL for target and staging tables.

use conduit_engine::runtime::WriteTarget;
use conduit_types::error::ConnectorError;
use rusqlite::Connection;

use crate::sql_error;

const MAX_IDENTIFIER_LEN: usize = 128;

/// Validate a generated table identifier.
pub(crate) fn validate_identifier(name: &str) -> Result<(), ConnectorError> {
    if name.is_empty() {
        return Err(ConnectorError::config("INVALID_IDENTIFIER", "table name must not be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(ConnectorError::config(
            "INVALID_IDENTIFIER",
            format!("table name '{name}' exceeds {MAX_IDENTIFIER_LEN} characters"),
        ));
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(ConnectorError::config(
            "INVALID_IDENTIFIER",
            format!("table name '{name}' must not start with a digit"),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConnectorError::config(
            "INVALID_IDENTIFIER",
            format!("table name '{name}' contains invalid characters"),
        ));
    }
    Ok(())
}

/// Target table for a stream: `<destination>__<stream>` with anything outside
/// `[A-Za-z0-9_]` replaced by `_`. Connections sharing a table own disjoint
/// row sets keyed by `_connection_id`.
pub fn table_name(destination: &str, stream: &str) -> Result<String, ConnectorError> {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    };
    let name = format!("{}__{}", sanitize(destination), sanitize(stream));
    validate_identifier(&name)?;
    Ok(name)
}

pub(crate) fn target_table(target: &WriteTarget) -> Result<String, ConnectorError> {
    table_name(&target.destination, target.stream.as_str())
}

/// Staging tables are per run so a retried or concurrent run never reuses
/// another's rows.
pub(crate) fn staging_table(target: &WriteTarget) -> Result<String, ConnectorError> {
    let name = format!("{}__conduit_staging_{}", target_table(target)?, target.run_id);
    validate_identifier(&name)?;
    Ok(name)
}

pub(crate) fn ensure_target(conn: &Connection, table: &str) -> Result<(), ConnectorError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
            _rowid INTEGER PRIMARY KEY AUTOINCREMENT,
            _connection_id TEXT NOT NULL,
            _pk TEXT,
            _run_id INTEGER NOT NULL,
            _synced_at TEXT NOT NULL,
            data TEXT NOT NULL,
            UNIQUE (_connection_id, _pk)
        );"
    ))
    .map_err(|e| sql_error(&format!("create table {table}"), e))
}

/// Drop any leftover staging table and create a fresh one.
pub(crate) fn prepare_staging(conn: &Connection, staging: &str) -> Result<(), ConnectorError> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS \"{staging}\";
         CREATE TABLE \"{staging}\" (
            _seq INTEGER PRIMARY KEY AUTOINCREMENT,
            _pk TEXT,
            data TEXT NOT NULL
         );"
    ))
    .map_err(|e| sql_error(&format!("prepare staging {staging}"), e))?;
    tracing::debug!(table = staging, "Prepared staging table");
    Ok(())
}

pub(crate) fn drop_staging(conn: &Connection, staging: &str) -> Result<(), ConnectorError> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{staging}\";"))
        .map_err(|e| sql_error(&format!("drop staging {staging}"), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(table_name("warehouse", "public.users").unwrap(), "warehouse__public_users");
        assert_eq!(table_name("lake-1", "orders").unwrap(), "lake_1__orders");
    }

    #[test]
    fn invalid_identifiers_rejected() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
        assert!(validate_identifier("a\"b").is_err());
        assert!(table_name("9lives", "x").is_err());
        assert!(validate_identifier("ok_name_1").is_ok());
    }
}
