//! Sync coordinator: lock, plan, fan out per-stream workers, aggregate.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_state::{AcquireOutcome, StateBackend, StateError, WriteOutcome};
use conduit_types::connection::{Connection, ConnectionStatus};
use conduit_types::run::{RunStatus, StreamRunResult, StreamRunStatus, SyncRun, TriggerMode};
use conduit_types::state::{ConnectionId, CursorState, RunId, StreamName};
use conduit_types::wire::{AuthType, SchemaChangePolicy};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::errors::{CancelReason, Rejected, RetryPolicy, SyncError};
use crate::progress::{RunControl, RunProgress};
use crate::registry::ConnectorRegistry;
use crate::runtime::{CredentialResolver, Destination, Secret, SourceContext};
use crate::scheduler::SyncTrigger;
use crate::store::with_state;
use crate::worker::{self, StreamJob, WorkerContext};

/// Error recorded on runs finalized by stale-run recovery.
pub const INTERRUPTED_MESSAGE: &str = "sync interrupted";

/// Tunables for run execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Upper bound on concurrently running stream workers per run.
    pub max_concurrency: usize,
    /// Runs are cancelled once they exceed this duration.
    pub max_run_duration: Duration,
    /// Extra time past `max_run_duration` before another instance's run is
    /// considered abandoned.
    pub stale_grace: Duration,
    /// How often an owned run checks for persisted cancel requests.
    pub cancel_poll: Duration,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_run_duration: Duration::from_secs(6 * 60 * 60),
            stale_grace: Duration::from_secs(10 * 60),
            cancel_poll: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

struct ActiveRun {
    control: Arc<RunControl>,
    progress: Arc<RunProgress>,
    done: watch::Receiver<Option<SyncRun>>,
}

struct Inner {
    state: Arc<dyn StateBackend>,
    registry: Arc<ConnectorRegistry>,
    destination: Arc<dyn Destination>,
    credentials: Arc<dyn CredentialResolver>,
    config: CoordinatorConfig,
    active: Mutex<HashMap<RunId, ActiveRun>>,
}

/// Everything loaded under the lock before a run starts executing.
struct RunPlan {
    run_id: RunId,
    connection: Connection,
    cursors: HashMap<StreamName, CursorState>,
}

/// Turns triggers into locked, per-stream parallel runs.
///
/// Cheap to clone; clones share the set of runs owned by this process.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        state: Arc<dyn StateBackend>,
        registry: Arc<ConnectorRegistry>,
        destination: Arc<dyn Destination>,
        credentials: Arc<dyn CredentialResolver>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                registry,
                destination,
                credentials,
                config,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.inner.registry
    }

    fn active(&self) -> MutexGuard<'_, HashMap<RunId, ActiveRun>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Trigger
    // -----------------------------------------------------------------------

    /// Start a sync of `connection`.
    ///
    /// Returns the run in `running` once the lock is held and the run is
    /// persisted; streams execute in the background.
    ///
    /// # Errors
    ///
    /// * [`SyncError::LockConflict`] if a run is already active or the
    ///   connection is paused.
    /// * [`SyncError::NotFound`] for an unknown connection.
    /// * [`SyncError::State`] on storage failure.
    pub async fn trigger(
        &self,
        connection: &ConnectionId,
        mode: TriggerMode,
    ) -> Result<SyncRun, SyncError> {
        let id = connection.clone();
        let outcome = with_state(&self.inner.state, move |s| {
            s.try_acquire_sync(&id, Utc::now())
        })
        .await?;

        match outcome {
            AcquireOutcome::Acquired { .. } => {}
            AcquireOutcome::AlreadySyncing => {
                tracing::info!(
                    connection = connection.as_str(),
                    trigger = %mode,
                    "Trigger rejected: sync already running"
                );
                return Err(SyncError::LockConflict(Rejected::AlreadyRunning));
            }
            AcquireOutcome::Paused => {
                tracing::info!(
                    connection = connection.as_str(),
                    trigger = %mode,
                    "Trigger rejected: connection paused"
                );
                return Err(SyncError::LockConflict(Rejected::Paused));
            }
            AcquireOutcome::NotFound => {
                return Err(SyncError::not_found("connection", connection));
            }
        }

        match self.start_run(connection, mode).await {
            Ok(run) => Ok(run),
            Err(err) => {
                tracing::error!(
                    connection = connection.as_str(),
                    error = %err,
                    "Failed to start sync run"
                );
                let id = connection.clone();
                let message = err.to_string();
                if let Err(release_err) = with_state(&self.inner.state, move |s| {
                    s.release_sync(&id, ConnectionStatus::Error, Some(message.as_str()), Utc::now())
                })
                .await
                {
                    tracing::error!(
                        connection = connection.as_str(),
                        error = %release_err,
                        "Failed to release sync lock"
                    );
                }
                Err(err)
            }
        }
    }

    async fn start_run(
        &self,
        connection: &ConnectionId,
        mode: TriggerMode,
    ) -> Result<SyncRun, SyncError> {
        let id = connection.clone();
        let (loaded, cursors) = with_state(&self.inner.state, move |s| {
            let conn = s.get_connection(&id)?;
            let cursors = s.list_cursors(&id)?;
            Ok((conn, cursors))
        })
        .await?;
        let conn = loaded.ok_or_else(|| SyncError::not_found("connection", connection))?;
        let cursors: HashMap<StreamName, CursorState> = cursors
            .into_iter()
            .map(|c| (c.stream, c.state))
            .collect();

        let streams: Vec<StreamRunResult> = conn
            .enabled_streams()
            .map(|config| {
                let mut result = StreamRunResult::pending(config.name.clone());
                if config.sync_mode.is_cursored() {
                    result.cursor_before = cursors
                        .get(&config.name)
                        .and_then(|c| c.cursor_value.clone());
                }
                result
            })
            .collect();

        let id = connection.clone();
        let run = with_state(&self.inner.state, move |s| {
            let mut run = s.create_run(&id, mode, &streams, Utc::now())?;
            let started = Utc::now();
            s.mark_running(run.id, started)?;
            run.status = RunStatus::Running;
            run.started_at = Some(started);
            Ok(run)
        })
        .await?;

        tracing::info!(
            connection = connection.as_str(),
            run_id = run.id.get(),
            trigger = %mode,
            streams = run.streams.len(),
            "Sync run started"
        );

        let control = Arc::new(RunControl::new());
        let progress = Arc::new(RunProgress::new(run.clone()));
        let (done_tx, done_rx) = watch::channel(None);
        self.active().insert(
            run.id,
            ActiveRun {
                control: Arc::clone(&control),
                progress: Arc::clone(&progress),
                done: done_rx,
            },
        );

        let plan = RunPlan {
            run_id: run.id,
            connection: conn,
            cursors,
        };
        let this = self.clone();
        tokio::spawn(async move {
            this.execute(plan, control, progress, done_tx).await;
        });

        Ok(run)
    }

    // -----------------------------------------------------------------------
    // Background execution
    // -----------------------------------------------------------------------

    async fn execute(
        self,
        plan: RunPlan,
        control: Arc<RunControl>,
        progress: Arc<RunProgress>,
        done: watch::Sender<Option<SyncRun>>,
    ) {
        let run_id = plan.run_id;
        let connection = plan.connection.id.clone();
        let watchers = CancellationToken::new();
        self.spawn_watchers(run_id, &control, &watchers);

        let this = self.clone();
        let task_control = Arc::clone(&control);
        let task_progress = Arc::clone(&progress);
        let handle =
            tokio::spawn(async move { this.run_streams(plan, task_control, task_progress).await });
        let abort = match handle.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(join_err) => Some(SyncError::Infrastructure(anyhow::anyhow!(
                "sync task panicked: {join_err}"
            ))),
        };
        watchers.cancel();

        let run = self
            .finalize(&connection, &control, &progress, abort.as_ref())
            .await;
        self.active().remove(&run_id);
        done.send_replace(Some(run));
    }

    fn spawn_watchers(&self, run_id: RunId, control: &Arc<RunControl>, stop: &CancellationToken) {
        let limit = self.inner.config.max_run_duration;
        let timeout_control = Arc::clone(control);
        let timeout_stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = timeout_stop.cancelled() => {}
                () = tokio::time::sleep(limit) => {
                    tracing::warn!(run_id = run_id.get(), "Sync exceeded maximum run duration, cancelling");
                    timeout_control.cancel(CancelReason::Timeout);
                }
            }
        });

        let poll = self.inner.config.cancel_poll;
        let state = Arc::clone(&self.inner.state);
        let poll_control = Arc::clone(control);
        let poll_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = poll_stop.cancelled() => break,
                    () = tokio::time::sleep(poll) => {}
                }
                match with_state(&state, move |s| s.cancel_requested(run_id)).await {
                    Ok(true) => {
                        poll_control.cancel(CancelReason::Operator);
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(run_id = run_id.get(), error = %e, "Cancel poll failed");
                    }
                }
            }
        });
    }

    /// Resolve credentials, discover once, then run every stream on a
    /// bounded pool. `Err` means the run was aborted before any stream ran.
    async fn run_streams(
        &self,
        plan: RunPlan,
        control: Arc<RunControl>,
        progress: Arc<RunProgress>,
    ) -> Result<(), SyncError> {
        let conn = &plan.connection;
        let (spec, runtime) = self.inner.registry.get(&conn.connector_kind).ok_or_else(|| {
            SyncError::Validation(vec![format!(
                "Unknown connector kind '{}'",
                conn.connector_kind
            )])
        })?;

        let secret = if spec.auth_type == AuthType::None {
            Secret::empty()
        } else {
            self.inner
                .credentials
                .resolve(&conn.id)
                .await
                .map_err(SyncError::FatalConnector)?
        };
        let source = SourceContext {
            connection_id: conn.id.clone(),
            config: conn.config.clone(),
            secret,
        };

        let catalog = tokio::select! {
            () = control.token().cancelled() => return Ok(()),
            discovered = runtime.discover(&source) => discovered.map_err(SyncError::from_source)?,
        };

        let mut drift = false;
        let mut jobs = Vec::new();
        for config in conn.enabled_streams() {
            let name = config.name.as_str();
            let Some(schema) = catalog.iter().find(|s| s.name == name) else {
                let err = SyncError::Schema {
                    stream: name.to_string(),
                    message: "stream not found in discovered catalog".into(),
                };
                tracing::error!(connection = conn.id.as_str(), stream = name, "Configured stream missing from source");
                progress.finish_stream(name, StreamRunStatus::Failed, Some(err.to_string()), None);
                continue;
            };

            let fingerprint = schema.fingerprint();
            let stored = plan.cursors.get(&config.name);
            let previous = stored.and_then(|c| c.schema_fingerprint.as_deref());
            if previous.is_some_and(|prev| prev != fingerprint) {
                drift = true;
                tracing::warn!(
                    connection = conn.id.as_str(),
                    stream = name,
                    policy = ?config.on_schema_change,
                    "Schema drift detected"
                );
                if config.on_schema_change == SchemaChangePolicy::Fail {
                    let err = SyncError::Schema {
                        stream: name.to_string(),
                        message: "discovered schema differs from the last synced schema".into(),
                    };
                    progress.finish_stream(
                        name,
                        StreamRunStatus::Failed,
                        Some(err.to_string()),
                        None,
                    );
                    continue;
                }
            }

            jobs.push(StreamJob {
                config: config.clone(),
                target: worker::write_target(&conn.destination, &conn.id, config, plan.run_id),
                stored: if config.sync_mode.is_cursored() {
                    stored.and_then(|c| c.cursor_value.clone())
                } else {
                    None
                },
                fingerprint: Some(fingerprint),
            });
        }

        if drift {
            let id = conn.id.clone();
            if let Err(e) = with_state(&self.inner.state, move |s| {
                s.set_schema_change(&id, true, Utc::now())
            })
            .await
            {
                tracing::error!(connection = conn.id.as_str(), error = %e, "Failed to flag schema change");
            }
        }

        let parallelism = jobs
            .len()
            .min(self.inner.config.max_concurrency)
            .min(spec.max_concurrent_streams)
            .max(1);
        tracing::info!(
            connection = conn.id.as_str(),
            run_id = plan.run_id.get(),
            streams = jobs.len(),
            parallelism,
            "Dispatching stream workers"
        );

        let ctx = Arc::new(WorkerContext {
            state: Arc::clone(&self.inner.state),
            runtime,
            destination: Arc::clone(&self.inner.destination),
            source,
            progress: Arc::clone(&progress),
            control: Arc::clone(&control),
            retry: self.inner.config.retry,
        });
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut workers = JoinSet::new();
        for job in jobs {
            let permit = Arc::clone(&semaphore).acquire_owned().await.map_err(|e| {
                SyncError::Infrastructure(anyhow::anyhow!("Failed to acquire stream permit: {e}"))
            })?;
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move {
                let _permit = permit;
                worker::run_stream(ctx, job).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Err(err) = &outcome.result {
                        if err.is_connection_level() {
                            tracing::error!(
                                connection = conn.id.as_str(),
                                stream = outcome.stream.as_str(),
                                error = %err,
                                "Connection-level failure, cancelling remaining streams"
                            );
                            control.cancel(CancelReason::ConnectionError(err.to_string()));
                        }
                    }
                }
                Err(join_err) => {
                    tracing::error!(
                        connection = conn.id.as_str(),
                        error = %join_err,
                        "Stream worker panicked"
                    );
                }
            }
        }
        Ok(())
    }

    async fn finalize(
        &self,
        connection: &ConnectionId,
        control: &RunControl,
        progress: &RunProgress,
        abort: Option<&SyncError>,
    ) -> SyncRun {
        let reason = control.reason().cloned();
        let mut run = progress.snapshot();
        settle_streams(&mut run.streams, abort, reason.as_ref());

        let outcome = aggregate(&run.streams, abort, reason.as_ref());
        run.status = outcome.run_status;
        run.error.clone_from(&outcome.error);
        run.completed_at = Some(Utc::now());
        run.recompute_totals();

        let record = run.clone();
        if let Err(e) = with_state(&self.inner.state, move |s| s.record_run(&record)).await {
            tracing::error!(run_id = run.id.get(), error = %e, "Failed to record sync run");
        }

        let id = connection.clone();
        let connection_error = match outcome.connection_status {
            ConnectionStatus::Error => outcome.error.clone(),
            _ => None,
        };
        let status = outcome.connection_status;
        if let Err(e) = with_state(&self.inner.state, move |s| {
            s.release_sync(&id, status, connection_error.as_deref(), Utc::now())
        })
        .await
        {
            tracing::error!(connection = connection.as_str(), error = %e, "Failed to release sync lock");
        }

        tracing::info!(
            connection = connection.as_str(),
            run_id = run.id.get(),
            status = %run.status,
            records = run.records_synced,
            bytes = run.bytes_synced,
            "Sync run finished"
        );
        run
    }

    // -----------------------------------------------------------------------
    // Observation and control
    // -----------------------------------------------------------------------

    /// Live snapshot of a run owned by this instance.
    #[must_use]
    pub fn progress(&self, run_id: RunId) -> Option<SyncRun> {
        self.active().get(&run_id).map(|a| a.progress.snapshot())
    }

    /// Live snapshot if the run is active here, otherwise the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown run.
    pub async fn run(&self, run_id: RunId) -> Result<SyncRun, SyncError> {
        if let Some(run) = self.progress(run_id) {
            return Ok(run);
        }
        with_state(&self.inner.state, move |s| s.get_run(run_id))
            .await?
            .ok_or_else(|| SyncError::not_found("run", run_id))
    }

    /// Wait for a run owned by this instance to finish. Runs owned elsewhere
    /// return their stored record immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown run.
    pub async fn wait(&self, run_id: RunId) -> Result<SyncRun, SyncError> {
        let done = self.active().get(&run_id).map(|a| a.done.clone());
        if let Some(mut done) = done {
            if let Ok(finished) = done.wait_for(Option::is_some).await {
                if let Some(run) = finished.clone() {
                    return Ok(run);
                }
            }
        }
        with_state(&self.inner.state, move |s| s.get_run(run_id))
            .await?
            .ok_or_else(|| SyncError::not_found("run", run_id))
    }

    /// Run history of a connection, newest first, strictly older than
    /// `before` when given.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown connection.
    pub async fn list_runs(
        &self,
        connection: &ConnectionId,
        limit: u32,
        before: Option<RunId>,
    ) -> Result<Vec<SyncRun>, SyncError> {
        let id = connection.clone();
        let runs = with_state(&self.inner.state, move |s| {
            if s.get_connection(&id)?.is_none() {
                return Ok(None);
            }
            s.list_runs(&id, limit, before).map(Some)
        })
        .await?;
        runs.ok_or_else(|| SyncError::not_found("connection", connection))
    }

    /// Request cancellation of a run.
    ///
    /// # Errors
    ///
    /// * [`SyncError::NotFound`] for an unknown run.
    /// * [`SyncError::LockConflict`] if the run already finished.
    pub async fn cancel(&self, run_id: RunId) -> Result<(), SyncError> {
        let outcome = with_state(&self.inner.state, move |s| s.request_cancel(run_id)).await?;
        match outcome {
            WriteOutcome::Applied => {
                let control = self.active().get(&run_id).map(|a| Arc::clone(&a.control));
                if let Some(control) = control {
                    control.cancel(CancelReason::Operator);
                }
                tracing::info!(run_id = run_id.get(), "Sync run cancellation requested");
                Ok(())
            }
            WriteOutcome::NotFound => Err(SyncError::not_found("run", run_id)),
            WriteOutcome::Rejected => Err(SyncError::LockConflict(Rejected::RunFinished)),
        }
    }

    /// Finalize runs abandoned by a crashed instance and release their locks.
    ///
    /// Unfinished runs not owned here that started before
    /// `now - (max_run_duration + stale_grace)` are marked failed. Connections
    /// left `syncing` without any unfinished run are released as well.
    /// Returns how many runs and connections were recovered.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::State`] on storage failure.
    pub async fn recover_stale_runs(&self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        let threshold = self.inner.config.max_run_duration + self.inner.config.stale_grace;
        let cutoff = now
            - chrono::Duration::from_std(threshold).context("stale run threshold out of range")?;
        let owned: HashSet<RunId> = self.active().keys().copied().collect();

        let recovered = with_state(&self.inner.state, move |s| {
            let mut recovered = Vec::new();
            let mut live: HashSet<ConnectionId> = HashSet::new();

            for mut run in s.list_unfinished()? {
                let started = run.started_at.unwrap_or(run.created_at);
                if owned.contains(&run.id) || started > cutoff {
                    live.insert(run.connection_id.clone());
                    continue;
                }
                for stream in &mut run.streams {
                    if !stream.status.is_terminal() {
                        stream.status = StreamRunStatus::Skipped;
                        stream.error = Some(INTERRUPTED_MESSAGE.to_string());
                    }
                }
                run.status = RunStatus::Failed;
                run.error = Some(INTERRUPTED_MESSAGE.to_string());
                run.completed_at = Some(now);
                run.recompute_totals();
                match s.record_run(&run) {
                    Ok(()) => {}
                    Err(StateError::RunFinalized(_)) => continue,
                    Err(e) => return Err(e),
                }
                s.release_sync(
                    &run.connection_id,
                    ConnectionStatus::Error,
                    Some(INTERRUPTED_MESSAGE),
                    now,
                )?;
                recovered.push(run.connection_id.clone());
            }

            for conn in s.list_connections()? {
                let orphaned = conn.status == ConnectionStatus::Syncing
                    && conn.updated_at <= cutoff
                    && !live.contains(&conn.id)
                    && !recovered.contains(&conn.id);
                if orphaned
                    && s.release_sync(
                        &conn.id,
                        ConnectionStatus::Error,
                        Some(INTERRUPTED_MESSAGE),
                        now,
                    )?
                {
                    recovered.push(conn.id);
                }
            }
            Ok(recovered)
        })
        .await?;

        for connection in &recovered {
            tracing::warn!(
                connection = connection.as_str(),
                "Recovered interrupted sync; connection marked as error"
            );
        }
        Ok(recovered.len())
    }
}

#[async_trait]
impl SyncTrigger for Coordinator {
    async fn trigger(
        &self,
        connection: &ConnectionId,
        mode: TriggerMode,
    ) -> Result<SyncRun, SyncError> {
        Coordinator::trigger(self, connection, mode).await
    }

    async fn recover_stale_runs(&self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        Coordinator::recover_stale_runs(self, now).await
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Final status of a run and the connection status it releases to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunOutcome {
    pub run_status: RunStatus,
    pub connection_status: ConnectionStatus,
    pub error: Option<String>,
}

/// Give every stream that never reached a terminal status one.
fn settle_streams(
    streams: &mut [StreamRunResult],
    abort: Option<&SyncError>,
    reason: Option<&CancelReason>,
) {
    for stream in streams.iter_mut().filter(|s| !s.status.is_terminal()) {
        let (status, error) = match (abort, reason) {
            (Some(err), _) => (StreamRunStatus::Skipped, err.to_string()),
            (None, Some(reason)) => (StreamRunStatus::Skipped, reason.to_string()),
            (None, None) => (StreamRunStatus::Failed, "stream worker panicked".to_string()),
        };
        stream.status = status;
        stream.error = Some(error);
    }
}

pub(crate) fn aggregate(
    streams: &[StreamRunResult],
    abort: Option<&SyncError>,
    reason: Option<&CancelReason>,
) -> RunOutcome {
    if let Some(err) = abort {
        return RunOutcome {
            run_status: RunStatus::Failed,
            connection_status: ConnectionStatus::Error,
            error: Some(err.to_string()),
        };
    }
    let first_failure = streams
        .iter()
        .find(|s| s.status == StreamRunStatus::Failed)
        .map(|failed| {
            let detail = failed.error.as_deref().unwrap_or("unknown error");
            format!("stream '{}' failed: {detail}", failed.name)
        });

    match reason {
        // A stream that failed before the cancel still leaves the connection
        // in error.
        Some(CancelReason::Operator) => {
            return match first_failure {
                Some(error) => RunOutcome {
                    run_status: RunStatus::Cancelled,
                    connection_status: ConnectionStatus::Error,
                    error: Some(error),
                },
                None => RunOutcome {
                    run_status: RunStatus::Cancelled,
                    connection_status: ConnectionStatus::Active,
                    error: Some(CancelReason::Operator.to_string()),
                },
            };
        }
        Some(CancelReason::Timeout) => {
            return RunOutcome {
                run_status: RunStatus::Cancelled,
                connection_status: ConnectionStatus::Error,
                error: Some(CancelReason::Timeout.to_string()),
            };
        }
        Some(connection_err @ CancelReason::ConnectionError(_)) => {
            return RunOutcome {
                run_status: RunStatus::Failed,
                connection_status: ConnectionStatus::Error,
                error: Some(connection_err.to_string()),
            };
        }
        None => {}
    }

    if let Some(error) = first_failure {
        return RunOutcome {
            run_status: RunStatus::Failed,
            connection_status: ConnectionStatus::Error,
            error: Some(error),
        };
    }

    RunOutcome {
        run_status: RunStatus::Completed,
        connection_status: ConnectionStatus::Active,
        error: None,
    }
}
