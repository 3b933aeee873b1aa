//! Record batches exchanged between sources, the engine and destinations.

use serde::{Deserialize, Serialize};

use crate::cursor::CursorValue;

/// A single record: a JSON object keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A batch of records read from a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub records: Vec<Record>,
    /// Position after the last record of this batch; the next read may resume
    /// from here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CursorValue>,
    /// Serialized size of the batch as reported by the source.
    pub bytes: u64,
}

impl RecordBatch {
    /// Build a batch, measuring `bytes` as the JSON size of the records.
    #[must_use]
    pub fn new(records: Vec<Record>, checkpoint: Option<CursorValue>) -> Self {
        let bytes = records
            .iter()
            .map(|r| serde_json::to_vec(r).map_or(0, |v| v.len() as u64))
            .sum();
        Self {
            records,
            checkpoint,
            bytes,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Destination acknowledgement of a written batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    pub records_written: u64,
    pub bytes_written: u64,
}
