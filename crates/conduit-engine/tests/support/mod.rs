//! Test doubles shared by the engine integration tests: a scripted source,
//! an in-memory destination with staging semantics, and a harness wiring
//! them to a coordinator over in-memory SQLite state.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_engine::runtime::{
    BatchReader, ConnectorRuntime, CredentialResolver, Destination, ReadRequest, Secret,
    SourceContext, WriteTarget,
};
use conduit_engine::{
    ConnectionService, ConnectorRegistry, ConnectorSpec, Coordinator, CoordinatorConfig,
    RetryPolicy,
};
use conduit_state::{SqliteStateBackend, StateBackend};
use conduit_types::catalog::{ColumnSchema, FieldType, StreamSchema};
use conduit_types::connection::{Connection, NewConnection, StreamConfig};
use conduit_types::cursor::CursorValue;
use conduit_types::error::ConnectorError;
use conduit_types::record::{Record, RecordBatch, WriteAck};
use conduit_types::state::{ConnectionId, RunId, StreamName};
use conduit_types::wire::{
    AuthType, DestinationSyncMode, Feature, SchemaChangePolicy, SyncMode,
};

pub const CONNECTOR: &str = "scripted";

pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("record must be a JSON object, got {other}"),
    }
}

pub fn ts(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("valid RFC 3339 timestamp")
}

/// Cursor value of a row field: integers as `int64`, RFC 3339 strings as
/// `timestamp`, anything else as `utf8`.
pub fn cursor_of(value: &serde_json::Value) -> Option<CursorValue> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().map(|value| CursorValue::Int64 { value }),
        serde_json::Value::String(s) => Some(match s.parse::<DateTime<Utc>>() {
            Ok(value) => CursorValue::Timestamp { value },
            Err(_) => CursorValue::Utf8 { value: s.clone() },
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Scripted source
// ---------------------------------------------------------------------------

struct Fault {
    after_batches: usize,
    error: ConnectorError,
}

struct ScriptedStream {
    columns: Vec<ColumnSchema>,
    rows: Vec<Record>,
    batch_size: usize,
    batch_delay: Duration,
    faults: VecDeque<Fault>,
    forced_checkpoint: Option<CursorValue>,
    reads: usize,
    last_request: Option<ReadRequest>,
}

#[derive(Default)]
struct SourceState {
    streams: BTreeMap<String, ScriptedStream>,
    discover_error: Option<ConnectorError>,
}

/// Source whose streams, data and failures are set up by the test.
#[derive(Default)]
pub struct ScriptedSource {
    state: Mutex<SourceState>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_stream<T>(&self, name: &str, f: impl FnOnce(&mut ScriptedStream) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        let stream = state
            .streams
            .get_mut(name)
            .unwrap_or_else(|| panic!("stream '{name}' not scripted"));
        f(stream)
    }

    /// Add a stream with `id` (integer) and `updated_at` (timestamp) columns.
    pub fn add_stream(&self, name: &str, rows: Vec<Record>) {
        self.add_stream_with_columns(
            name,
            vec![
                column("id", FieldType::Integer),
                column("updated_at", FieldType::Timestamp),
            ],
            rows,
        );
    }

    pub fn add_stream_with_columns(&self, name: &str, columns: Vec<ColumnSchema>, rows: Vec<Record>) {
        self.state.lock().unwrap().streams.insert(
            name.to_string(),
            ScriptedStream {
                columns,
                rows,
                batch_size: 2,
                batch_delay: Duration::ZERO,
                faults: VecDeque::new(),
                forced_checkpoint: None,
                reads: 0,
                last_request: None,
            },
        );
    }

    pub fn push_rows(&self, name: &str, rows: Vec<Record>) {
        self.with_stream(name, |s| s.rows.extend(rows));
    }

    pub fn set_columns(&self, name: &str, columns: Vec<ColumnSchema>) {
        self.with_stream(name, |s| s.columns = columns);
    }

    pub fn set_batch_size(&self, name: &str, batch_size: usize) {
        self.with_stream(name, |s| s.batch_size = batch_size.max(1));
    }

    pub fn set_batch_delay(&self, name: &str, delay: Duration) {
        self.with_stream(name, |s| s.batch_delay = delay);
    }

    /// The next read of `name` fails after delivering `after_batches` batches.
    pub fn fail_read(&self, name: &str, after_batches: usize, error: ConnectorError) {
        self.with_stream(name, |s| {
            s.faults.push_back(Fault {
                after_batches,
                error,
            });
        });
    }

    /// Every batch of `name` carries `checkpoint` instead of its real position.
    pub fn force_checkpoint(&self, name: &str, checkpoint: CursorValue) {
        self.with_stream(name, |s| s.forced_checkpoint = Some(checkpoint));
    }

    pub fn fail_discover(&self, error: ConnectorError) {
        self.state.lock().unwrap().discover_error = Some(error);
    }

    pub fn reads(&self, name: &str) -> usize {
        self.with_stream(name, |s| s.reads)
    }

    pub fn last_request(&self, name: &str) -> Option<ReadRequest> {
        self.with_stream(name, |s| s.last_request.clone())
    }
}

pub fn column(name: &str, field_type: FieldType) -> ColumnSchema {
    ColumnSchema {
        name: name.into(),
        field_type,
        nullable: false,
    }
}

#[async_trait]
impl ConnectorRuntime for ScriptedSource {
    async fn discover(&self, _source: &SourceContext) -> Result<Vec<StreamSchema>, ConnectorError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.discover_error {
            return Err(err.clone());
        }
        Ok(state
            .streams
            .iter()
            .map(|(name, s)| StreamSchema {
                name: name.clone(),
                columns: s.columns.clone(),
                supported_sync_modes: vec![SyncMode::FullRefresh, SyncMode::Incremental],
                source_defined_cursor: None,
                source_defined_primary_key: None,
            })
            .collect())
    }

    async fn read(
        &self,
        _source: &SourceContext,
        request: ReadRequest,
    ) -> Result<Box<dyn BatchReader>, ConnectorError> {
        self.with_stream(request.stream.as_str(), |s| {
            s.reads += 1;
            s.last_request = Some(request.clone());

            let cursor_field = request
                .cursor_field
                .clone()
                .filter(|_| request.sync_mode.is_cursored());
            let mut rows: Vec<(Option<CursorValue>, Record)> = s
                .rows
                .iter()
                .map(|r| {
                    let cursor = cursor_field
                        .as_deref()
                        .and_then(|f| r.get(f))
                        .and_then(cursor_of);
                    (cursor, r.clone())
                })
                .filter(|(cursor, _)| match (&request.cursor, cursor) {
                    (Some(resume), Some(value)) => {
                        value.compare(resume) == Ok(std::cmp::Ordering::Greater)
                    }
                    _ => true,
                })
                .collect();
            if cursor_field.is_some() {
                rows.sort_by(|(a, _), (b, _)| match (a, b) {
                    (Some(a), Some(b)) => a.compare(b).unwrap_or(std::cmp::Ordering::Equal),
                    _ => std::cmp::Ordering::Equal,
                });
            }

            let batches: VecDeque<RecordBatch> = batches_of(rows, s.batch_size)
                .into_iter()
                .map(|chunk| {
                    let checkpoint = match &s.forced_checkpoint {
                        Some(forced) => Some(forced.clone()),
                        None => chunk.last().and_then(|(c, _)| c.clone()),
                    };
                    RecordBatch::new(chunk.into_iter().map(|(_, r)| r).collect(), checkpoint)
                })
                .collect();

            Ok(Box::new(ScriptedReader {
                batches,
                fault: s.faults.pop_front(),
                delivered: 0,
                delay: s.batch_delay,
            }) as Box<dyn BatchReader>)
        })
    }
}

type Keyed = (Option<CursorValue>, Record);

/// Split ordered rows into batches of `size`, growing a batch rather than
/// separating rows with equal cursors.
fn batches_of(rows: Vec<Keyed>, size: usize) -> Vec<Vec<Keyed>> {
    let mut out: Vec<Vec<Keyed>> = Vec::new();
    for row in rows {
        match out.last_mut() {
            Some(batch)
                if batch.len() < size
                    || (row.0.is_some() && batch.last().map(|(c, _)| c) == Some(&row.0)) =>
            {
                batch.push(row);
            }
            _ => out.push(vec![row]),
        }
    }
    out
}

struct ScriptedReader {
    batches: VecDeque<RecordBatch>,
    fault: Option<Fault>,
    delivered: usize,
    delay: Duration,
}

#[async_trait]
impl BatchReader for ScriptedReader {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, ConnectorError> {
        if self
            .fault
            .as_ref()
            .is_some_and(|f| f.after_batches == self.delivered)
        {
            if let Some(fault) = self.fault.take() {
                return Err(fault.error);
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let batch = self.batches.pop_front();
        if batch.is_some() {
            self.delivered += 1;
        }
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// In-memory destination
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DestinationState {
    tables: HashMap<(ConnectionId, String), Vec<Record>>,
    staging: HashMap<(String, RunId), Vec<Record>>,
    write_faults: HashMap<String, VecDeque<ConnectorError>>,
    commits: usize,
    aborts: usize,
}

/// Destination that stages each stream's writes per run and applies them
/// on commit: overwrite replaces, append extends, append_dedup upserts.
/// Every connection owns its own partition of a stream.
#[derive(Default)]
pub struct MemoryDestination {
    state: Mutex<DestinationState>,
}

impl MemoryDestination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Committed rows of `stream` across every connection.
    pub fn rows(&self, stream: &str) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .tables
            .iter()
            .filter(|((_, s), _)| s == stream)
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect()
    }

    /// Committed rows of `stream` sorted by their `id` column.
    pub fn ids(&self, stream: &str) -> Vec<i64> {
        sorted_ids(&self.rows(stream))
    }

    /// Committed ids of `stream` written by `connection`.
    pub fn ids_of(&self, connection: &ConnectionId, stream: &str) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        let rows = state
            .tables
            .get(&(connection.clone(), stream.to_string()))
            .cloned()
            .unwrap_or_default();
        sorted_ids(&rows)
    }

    pub fn fail_next_write(&self, stream: &str, error: ConnectorError) {
        self.state
            .lock()
            .unwrap()
            .write_faults
            .entry(stream.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().unwrap().aborts
    }

    pub fn staged_partitions(&self) -> usize {
        self.state.lock().unwrap().staging.len()
    }
}

fn sorted_ids(rows: &[Record]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .filter_map(|r| r.get("id").and_then(serde_json::Value::as_i64))
        .collect();
    ids.sort_unstable();
    ids
}

fn key_of(target: &WriteTarget) -> (String, RunId) {
    (target.stream.to_string(), target.run_id)
}

fn primary_key_of(record: &Record, primary_key: &[String]) -> String {
    primary_key
        .iter()
        .map(|k| record.get(k).map(ToString::to_string).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn begin(&self, target: &WriteTarget) -> Result<(), ConnectorError> {
        self.state
            .lock()
            .unwrap()
            .staging
            .insert(key_of(target), Vec::new());
        Ok(())
    }

    async fn write(
        &self,
        target: &WriteTarget,
        batch: &RecordBatch,
    ) -> Result<WriteAck, ConnectorError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state
            .write_faults
            .get_mut(target.stream.as_str())
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        let staged = state.staging.get_mut(&key_of(target)).ok_or_else(|| {
            ConnectorError::destination("NOT_BEGUN", "write before begin")
        })?;
        staged.extend(batch.records.iter().cloned());
        Ok(WriteAck {
            records_written: batch.len() as u64,
            bytes_written: batch.bytes,
        })
    }

    async fn commit(&self, target: &WriteTarget) -> Result<(), ConnectorError> {
        let mut state = self.state.lock().unwrap();
        let staged = state.staging.remove(&key_of(target)).ok_or_else(|| {
            ConnectorError::destination("NOT_BEGUN", "commit before begin")
        })?;
        let table = state
            .tables
            .entry((target.connection_id.clone(), target.stream.to_string()))
            .or_default();
        match target.mode {
            DestinationSyncMode::Overwrite => *table = staged,
            DestinationSyncMode::Append => table.extend(staged),
            DestinationSyncMode::AppendDedup => {
                for row in staged {
                    let key = primary_key_of(&row, &target.primary_key);
                    match table
                        .iter_mut()
                        .find(|existing| primary_key_of(existing, &target.primary_key) == key)
                    {
                        Some(existing) => *existing = row,
                        None => table.push(row),
                    }
                }
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn abort(&self, target: &WriteTarget) -> Result<(), ConnectorError> {
        let mut state = self.state.lock().unwrap();
        state.staging.remove(&key_of(target));
        state.aborts += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Resolver that returns a fixed secret, or an auth error when `None`.
pub struct StaticCredentials(pub Option<String>);

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, _connection: &ConnectionId) -> Result<Secret, ConnectorError> {
        match &self.0 {
            Some(secret) => Ok(Secret::new(secret.clone())),
            None => Err(ConnectorError::auth("NO_CREDENTIALS", "credentials rejected")),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct HarnessOptions {
    pub auth_type: AuthType,
    pub credentials: Option<String>,
    pub config: CoordinatorConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            auth_type: AuthType::None,
            credentials: None,
            config: CoordinatorConfig {
                max_concurrency: 4,
                cancel_poll: Duration::from_millis(20),
                retry: RetryPolicy {
                    max_retries: 3,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                },
                ..CoordinatorConfig::default()
            },
        }
    }
}

pub struct Harness {
    pub state: Arc<SqliteStateBackend>,
    pub source: Arc<ScriptedSource>,
    pub destination: Arc<MemoryDestination>,
    pub coordinator: Coordinator,
    pub connections: ConnectionService,
}

impl Harness {
    pub fn new(source: Arc<ScriptedSource>) -> Self {
        Self::with_options(source, HarnessOptions::default())
    }

    pub fn with_options(source: Arc<ScriptedSource>, options: HarnessOptions) -> Self {
        let state = Arc::new(SqliteStateBackend::in_memory().unwrap());
        let destination = MemoryDestination::new();

        let mut registry = ConnectorRegistry::new();
        registry
            .register(
                ConnectorSpec {
                    id: CONNECTOR.into(),
                    display_name: "Scripted".into(),
                    auth_type: options.auth_type,
                    features: vec![Feature::Incremental],
                    max_concurrent_streams: 4,
                },
                source.clone(),
            )
            .unwrap();
        let registry = Arc::new(registry);

        let backend: Arc<dyn StateBackend> = state.clone();
        let coordinator = Coordinator::new(
            Arc::clone(&backend),
            Arc::clone(&registry),
            destination.clone(),
            Arc::new(StaticCredentials(options.credentials)),
            options.config,
        );
        let connections = ConnectionService::new(backend, registry);

        Self {
            state,
            source,
            destination,
            coordinator,
            connections,
        }
    }

    pub async fn create(&self, streams: Vec<StreamConfig>) -> Connection {
        self.create_named("test", streams).await
    }

    pub async fn create_named(&self, name: &str, streams: Vec<StreamConfig>) -> Connection {
        self.connections
            .create(NewConnection {
                name: name.into(),
                connector_kind: CONNECTOR.into(),
                destination: "memory".into(),
                config: serde_json::json!({}),
                streams,
            })
            .await
            .unwrap()
    }
}

pub fn incremental_dedup(name: &str) -> StreamConfig {
    StreamConfig {
        name: StreamName::new(name),
        sync_mode: SyncMode::Incremental,
        destination_sync_mode: DestinationSyncMode::AppendDedup,
        cursor_field: Some("updated_at".into()),
        primary_key: vec!["id".into()],
        enabled: true,
        on_schema_change: SchemaChangePolicy::Propagate,
    }
}

pub fn incremental_append(name: &str, cursor_field: &str) -> StreamConfig {
    StreamConfig {
        name: StreamName::new(name),
        sync_mode: SyncMode::Incremental,
        destination_sync_mode: DestinationSyncMode::Append,
        cursor_field: Some(cursor_field.into()),
        primary_key: Vec::new(),
        enabled: true,
        on_schema_change: SchemaChangePolicy::Propagate,
    }
}

pub fn full_refresh_overwrite(name: &str) -> StreamConfig {
    StreamConfig {
        name: StreamName::new(name),
        sync_mode: SyncMode::FullRefresh,
        destination_sync_mode: DestinationSyncMode::Overwrite,
        cursor_field: None,
        primary_key: Vec::new(),
        enabled: true,
        on_schema_change: SchemaChangePolicy::Propagate,
    }
}

/// Rows with ids `from..=to`, each `updated_at` one minute after the
/// previous, starting at 2024-01-01T00:00:00Z.
pub fn rows(from: i64, to: i64) -> Vec<Record> {
    (from..=to)
        .map(|id| {
            record(serde_json::json!({
                "id": id,
                "updated_at": format!("2024-01-01T00:{:02}:00Z", id),
            }))
        })
        .collect()
}
