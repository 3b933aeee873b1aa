//! Stream reads: parse a file, filter past the resume cursor, and hand out
//! checkpointed batches.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use conduit_engine::runtime::{BatchReader, ReadRequest};
use conduit_types::cursor::CursorValue;
use conduit_types::error::ConnectorError;
use conduit_types::record::{Record, RecordBatch};

use crate::cursor;

/// Pre-built batches for one stream read.
#[derive(Debug)]
pub struct JsonlReader {
    batches: VecDeque<RecordBatch>,
}

#[async_trait]
impl BatchReader for JsonlReader {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, ConnectorError> {
        Ok(self.batches.pop_front())
    }
}

impl JsonlReader {
    /// Load `path` and slice it into batches for `request`.
    ///
    /// Cursored reads return only records strictly past `request.cursor`,
    /// ordered by cursor, each batch checkpointed at its last record. A batch
    /// grows past `batch_size` rather than split equal cursor values.
    /// Full-refresh reads keep file order and carry no checkpoints.
    pub fn open(
        path: &Path,
        request: &ReadRequest,
        batch_size: usize,
    ) -> Result<Self, ConnectorError> {
        let body = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConnectorError::schema(
                    "STREAM_NOT_FOUND",
                    format!("stream '{}' has no file at {}", request.stream, path.display()),
                )
            } else {
                ConnectorError::data("READ_FAILED", format!("{}: {e}", path.display()))
            }
        })?;
        let records = parse_lines(&body)?;

        let batches = if request.sync_mode.is_cursored() {
            let field = request.cursor_field.as_deref().ok_or_else(|| {
                ConnectorError::config(
                    "CURSOR_FIELD_REQUIRED",
                    format!("stream '{}' needs a cursor field for incremental reads", request.stream),
                )
            })?;
            cursored_batches(records, field, request.cursor.as_ref(), batch_size)?
        } else {
            records
                .into_iter()
                .map(|(_, r)| r)
                .collect::<Vec<_>>()
                .chunks(batch_size)
                .map(|chunk| RecordBatch::new(chunk.to_vec(), None))
                .collect()
        };

        tracing::debug!(
            stream = request.stream.as_str(),
            batches = batches.len(),
            "Prepared JSON-lines read"
        );
        Ok(Self { batches })
    }
}

/// Parse non-blank lines into records, keeping 1-based line numbers.
fn parse_lines(body: &str) -> Result<Vec<(usize, Record)>, ConnectorError> {
    let mut records = Vec::new();
    for (idx, line) in body.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(serde_json::Value::Object(record)) => records.push((line_no, record)),
            Ok(_) => {
                return Err(ConnectorError::data(
                    "NOT_AN_OBJECT",
                    format!("line {line_no}: expected a JSON object"),
                ))
            }
            Err(e) => {
                return Err(ConnectorError::data(
                    "INVALID_JSON",
                    format!("line {line_no}: {e}"),
                ))
            }
        }
    }
    Ok(records)
}

fn cursored_batches(
    records: Vec<(usize, Record)>,
    field: &str,
    resume: Option<&CursorValue>,
    batch_size: usize,
) -> Result<VecDeque<RecordBatch>, ConnectorError> {
    let mut keyed = Vec::with_capacity(records.len());
    for (line, record) in records {
        let value = cursor::extract(field, &record, line)?;
        if let Some(first) = keyed.first().map(|(v, _): &(CursorValue, Record)| v) {
            if first.cursor_type() != value.cursor_type() {
                return Err(ConnectorError::data(
                    "CURSOR_TYPE_MISMATCH",
                    format!(
                        "line {line}: cursor field '{field}' is {} but earlier rows are {}",
                        value.cursor_type(),
                        first.cursor_type()
                    ),
                ));
            }
        }
        keyed.push((value, record));
    }

    if let Some(resume) = resume {
        let mut kept = Vec::with_capacity(keyed.len());
        for (value, record) in keyed {
            let ord = value.compare(resume).map_err(|e| {
                ConnectorError::data("CURSOR_TYPE_MISMATCH", format!("resume cursor: {e}"))
            })?;
            if ord == Ordering::Greater {
                kept.push((value, record));
            }
        }
        keyed = kept;
    }

    // Types were checked above, so comparisons cannot fail here.
    keyed.sort_by(|a, b| a.0.compare(&b.0).unwrap_or(Ordering::Equal));

    let mut batches = VecDeque::new();
    let mut iter = keyed.into_iter().peekable();
    while iter.peek().is_some() {
        let mut chunk: Vec<(CursorValue, Record)> = iter.by_ref().take(batch_size).collect();
        // Rows sharing a cursor value stay in one batch so every checkpoint
        // is a valid resume point.
        if let Some(last) = chunk.last().map(|(v, _)| v.clone()) {
            while let Some(tie) = iter.next_if(|(v, _)| v.compare(&last) == Ok(Ordering::Equal)) {
                chunk.push(tie);
            }
        }
        let checkpoint = chunk.last().map(|(v, _)| v.clone());
        let records = chunk.into_iter().map(|(_, r)| r).collect();
        batches.push_back(RecordBatch::new(records, checkpoint));
    }
    Ok(batches)
}
