//! Staging writes and the commit that publishes them.

use conduit_engine::runtime::WriteTarget;
use conduit_types::error::ConnectorError;
use conduit_types::record::{Record, RecordBatch, WriteAck};
use conduit_types::wire::DestinationSyncMode;
use rusqlite::{params, Connection};

use crate::ddl;
use crate::sql_error;

/// Dedup key for a record: the JSON array of its primary key values.
fn primary_key(record: &Record, primary_key: &[String]) -> Result<String, ConnectorError> {
    let mut values = Vec::with_capacity(primary_key.len());
    for field in primary_key {
        match record.get(field) {
            None | Some(serde_json::Value::Null) => {
                return Err(ConnectorError::data(
                    "PRIMARY_KEY_MISSING",
                    format!("record is missing primary key field '{field}'"),
                ))
            }
            Some(v) => values.push(v.clone()),
        }
    }
    Ok(serde_json::Value::Array(values).to_string())
}

/// Append a batch to the stream's staging table in one transaction.
pub(crate) fn stage_batch(
    conn: &mut Connection,
    target: &WriteTarget,
    batch: &RecordBatch,
) -> Result<WriteAck, ConnectorError> {
    let staging = ddl::staging_table(target)?;
    let dedup = target.mode == DestinationSyncMode::AppendDedup;

    let tx = conn
        .transaction()
        .map_err(|e| sql_error("begin write", e))?;
    let mut ack = WriteAck::default();
    {
        let mut stmt = tx
            .prepare(&format!("INSERT INTO \"{staging}\" (_pk, data) VALUES (?1, ?2)"))
            .map_err(|e| sql_error(&format!("prepare insert into {staging}"), e))?;
        for record in &batch.records {
            let pk = if dedup {
                Some(primary_key(record, &target.primary_key)?)
            } else {
                None
            };
            let data = serde_json::to_string(record)
                .map_err(|e| ConnectorError::data("ENCODE_FAILED", e.to_string()))?;
            stmt.execute(params![pk, data])
                .map_err(|e| sql_error(&format!("insert into {staging}"), e))?;
            ack.records_written += 1;
            ack.bytes_written += data.len() as u64;
        }
    }
    tx.commit().map_err(|e| sql_error("commit write", e))?;
    Ok(ack)
}

/// Publish staged rows to the target table and drop the staging table, all
/// in one transaction.
///
/// `overwrite` replaces the table contents, `append` adds every staged row,
/// `append_dedup` upserts by primary key with the last staged row winning.
pub(crate) fn publish(conn: &mut Connection, target: &WriteTarget) -> Result<u64, ConnectorError> {
    let table = ddl::target_table(target)?;
    let staging = ddl::staging_table(target)?;
    let synced_at = chrono::Utc::now().to_rfc3339();
    let run_id = target.run_id.get();
    let connection = target.connection_id.as_str();

    let tx = conn
        .transaction()
        .map_err(|e| sql_error("begin commit", e))?;

    let staged: i64 = tx
        .query_row(&format!("SELECT COUNT(*) FROM \"{staging}\""), [], |row| row.get(0))
        .map_err(|e| sql_error(&format!("count {staging}"), e))?;

    if target.mode == DestinationSyncMode::Overwrite {
        tx.execute(
            &format!("DELETE FROM \"{table}\" WHERE _connection_id = ?1"),
            params![connection],
        )
        .map_err(|e| sql_error(&format!("clear {table}"), e))?;
    }

    match target.mode {
        DestinationSyncMode::Overwrite | DestinationSyncMode::Append => {
            tx.execute(
                &format!(
                    "INSERT INTO \"{table}\" (_connection_id, _pk, _run_id, _synced_at, data)
                     SELECT ?1, NULL, ?2, ?3, data FROM \"{staging}\" ORDER BY _seq"
                ),
                params![connection, run_id, synced_at],
            )
            .map_err(|e| sql_error(&format!("insert into {table}"), e))?;
        }
        DestinationSyncMode::AppendDedup => {
            tx.execute(
                &format!(
                    "INSERT INTO \"{table}\" (_connection_id, _pk, _run_id, _synced_at, data)
                     SELECT ?1, _pk, ?2, ?3, data FROM \"{staging}\" WHERE true ORDER BY _seq
                     ON CONFLICT(_connection_id, _pk) DO UPDATE SET
                        data = excluded.data,
                        _run_id = excluded._run_id,
                        _synced_at = excluded._synced_at"
                ),
                params![connection, run_id, synced_at],
            )
            .map_err(|e| sql_error(&format!("upsert into {table}"), e))?;
        }
    }

    tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{staging}\";"))
        .map_err(|e| sql_error(&format!("drop staging {staging}"), e))?;
    tx.commit().map_err(|e| sql_error("commit publish", e))?;

    tracing::info!(
        table = table.as_str(),
        connection,
        mode = ?target.mode,
        rows = staged,
        "Published staged rows"
    );
    Ok(u64::try_from(staged).unwrap_or_default())
}

/// Committed rows of a table in insertion order, optionally only those
/// owned by one connection.
pub(crate) fn read_table(
    conn: &Connection,
    table: &str,
    connection: Option<&str>,
) -> Result<Vec<Record>, ConnectorError> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table],
            |row| row.get(0),
        )
        .map_err(|e| sql_error("lookup table", e))?;
    if !exists {
        return Ok(Vec::new());
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT data FROM \"{table}\"
             WHERE ?1 IS NULL OR _connection_id = ?1
             ORDER BY _rowid"
        ))
        .map_err(|e| sql_error(&format!("select from {table}"), e))?;
    let rows = stmt
        .query_map(params![connection], |row| row.get::<_, String>(0))
        .map_err(|e| sql_error(&format!("select from {table}"), e))?;

    let mut records = Vec::new();
    for data in rows {
        let data = data.map_err(|e| sql_error(&format!("read {table}"), e))?;
        let record: Record = serde_json::from_str(&data)
            .map_err(|e| ConnectorError::data("DECODE_FAILED", e.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn composite_primary_key_encoding() {
        let pk = primary_key(
            &record(serde_json::json!({"a": 1, "b": "x", "c": true})),
            &["a".into(), "b".into()],
        )
        .unwrap();
        assert_eq!(pk, r#"[1,"x"]"#);
    }

    #[test]
    fn null_primary_key_is_data_error() {
        let err = primary_key(&record(serde_json::json!({"a": null})), &["a".into()]).unwrap_err();
        assert_eq!(err.code, "PRIMARY_KEY_MISSING");
    }
}
