//! Per-stream sync worker: read, write, retry, then commit.

use std::sync::Arc;

use chrono::Utc;
use conduit_state::StateBackend;
use conduit_types::connection::StreamConfig;
use conduit_types::cursor::CursorValue;
use conduit_types::run::StreamRunStatus;
use conduit_types::state::{ConnectionId, RunId, StreamName};

use crate::checkpoint::{ensure_monotonic, persist_stream_commit, StreamCommit};
use crate::errors::{compute_backoff, CancelReason, RetryPolicy, SyncError};
use crate::progress::{RunControl, RunProgress};
use crate::runtime::{ConnectorRuntime, Destination, ReadRequest, SourceContext, WriteTarget};
use crate::store::with_state;

/// Shared, read-only inputs for every worker of one run.
pub(crate) struct WorkerContext {
    pub state: Arc<dyn StateBackend>,
    pub runtime: Arc<dyn ConnectorRuntime>,
    pub destination: Arc<dyn Destination>,
    pub source: SourceContext,
    pub progress: Arc<RunProgress>,
    pub control: Arc<RunControl>,
    pub retry: RetryPolicy,
}

/// One stream's unit of work.
pub(crate) struct StreamJob {
    pub config: StreamConfig,
    pub target: WriteTarget,
    /// Committed cursor the read resumes from (cursored streams only).
    pub stored: Option<CursorValue>,
    /// Fingerprint of the schema discovered for this run.
    pub fingerprint: Option<String>,
}

/// Terminal outcome of a worker, as reported back to the coordinator.
pub(crate) struct StreamOutcome {
    pub stream: StreamName,
    pub result: Result<Option<CursorValue>, SyncError>,
}

/// Progress of one stream across read attempts.
#[derive(Default)]
struct CopyState {
    /// Last checkpoint whose batch the destination acknowledged.
    last_ack: Option<CursorValue>,
    acked_batches: u64,
    /// Consecutive failed attempts since the last acknowledged batch.
    failures: u32,
    attempts: u32,
}

/// Run one stream to a terminal status and record it on the run progress.
pub(crate) async fn run_stream(ctx: Arc<WorkerContext>, job: StreamJob) -> StreamOutcome {
    let name = job.config.name.clone();

    if ctx.control.is_cancelled() {
        let err = cancelled(&ctx.control);
        ctx.progress
            .finish_stream(name.as_str(), StreamRunStatus::Skipped, Some(err.to_string()), None);
        return StreamOutcome {
            stream: name,
            result: Err(err),
        };
    }

    ctx.progress.start_stream(name.as_str());
    tracing::info!(
        connection = job.target.connection_id.as_str(),
        stream = name.as_str(),
        sync_mode = %job.config.sync_mode,
        destination_sync_mode = %job.config.destination_sync_mode,
        "Stream sync started"
    );

    let result = sync_stream(&ctx, &job).await;
    match &result {
        Ok(cursor_after) => {
            ctx.progress.finish_stream(
                name.as_str(),
                StreamRunStatus::Completed,
                None,
                cursor_after.clone(),
            );
            tracing::info!(stream = name.as_str(), "Stream sync completed");
        }
        Err(SyncError::Cancelled(reason)) => {
            ctx.progress.finish_stream(
                name.as_str(),
                StreamRunStatus::Skipped,
                Some(reason.to_string()),
                None,
            );
            tracing::info!(stream = name.as_str(), reason = %reason, "Stream sync interrupted");
        }
        Err(err) => {
            ctx.progress.finish_stream(
                name.as_str(),
                StreamRunStatus::Failed,
                Some(err.to_string()),
                None,
            );
            tracing::error!(stream = name.as_str(), error = %err, "Stream sync failed");
        }
    }

    StreamOutcome {
        stream: name,
        result,
    }
}

async fn sync_stream(
    ctx: &WorkerContext,
    job: &StreamJob,
) -> Result<Option<CursorValue>, SyncError> {
    ctx.destination
        .begin(&job.target)
        .await
        .map_err(SyncError::from_destination)?;

    let copy = match copy_with_retries(ctx, job).await {
        Ok(copy) => copy,
        Err(err) => {
            abort_quietly(ctx, &job.target).await;
            return Err(err);
        }
    };

    if let Err(err) = ctx.destination.commit(&job.target).await {
        abort_quietly(ctx, &job.target).await;
        return Err(SyncError::from_destination(err));
    }

    // Cursor advances only once the destination has committed.
    let commit = StreamCommit {
        connection: job.target.connection_id.clone(),
        stream: job.config.name.clone(),
        sync_mode: job.config.sync_mode,
        cursor_field: job.config.cursor_field.clone(),
        acknowledged: copy.last_ack.clone(),
        fingerprint: job.fingerprint.clone(),
        run: job.target.run_id,
    };
    with_state(&ctx.state, move |state| {
        persist_stream_commit(state, &commit, Utc::now())
    })
    .await?;

    if job.config.sync_mode.is_cursored() {
        Ok(copy.last_ack.or_else(|| job.stored.clone()))
    } else {
        Ok(None)
    }
}

async fn copy_with_retries(ctx: &WorkerContext, job: &StreamJob) -> Result<CopyState, SyncError> {
    let name = job.config.name.as_str();
    let mut copy = CopyState::default();

    loop {
        copy.attempts += 1;
        ctx.progress.set_attempts(name, copy.attempts);

        let err = match read_pass(ctx, job, &mut copy).await {
            Ok(()) => return Ok(copy),
            Err(err) => err,
        };
        let Some(connector_err) = err.as_connector_error().filter(|_| err.is_retryable()) else {
            return Err(err);
        };
        if copy.failures >= ctx.retry.max_retries {
            tracing::warn!(
                stream = name,
                attempts = copy.attempts,
                "Retry budget exhausted"
            );
            return Err(err);
        }

        copy.failures += 1;
        let delay = compute_backoff(connector_err, copy.failures, &ctx.retry);
        tracing::warn!(
            stream = name,
            attempt = copy.failures,
            max_retries = ctx.retry.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Transient error, retrying stream read"
        );

        tokio::select! {
            biased;
            () = ctx.control.token().cancelled() => return Err(cancelled(&ctx.control)),
            () = tokio::time::sleep(delay) => {}
        }

        // Without a checkpoint the read restarts from scratch, so anything
        // staged so far would be delivered twice.
        if copy.last_ack.is_none() && copy.acked_batches > 0 {
            ctx.destination
                .abort(&job.target)
                .await
                .map_err(SyncError::from_destination)?;
            ctx.destination
                .begin(&job.target)
                .await
                .map_err(SyncError::from_destination)?;
            ctx.progress.reset_counts(name);
            copy.acked_batches = 0;
        }
    }
}

/// A single read from the resume position to the end of the stream.
async fn read_pass(
    ctx: &WorkerContext,
    job: &StreamJob,
    copy: &mut CopyState,
) -> Result<(), SyncError> {
    let name = job.config.name.as_str();
    let resume = copy.last_ack.clone().or_else(|| job.stored.clone());
    let request = ReadRequest {
        stream: job.config.name.clone(),
        sync_mode: job.config.sync_mode,
        cursor_field: job.config.cursor_field.clone(),
        cursor: resume,
    };

    let mut reader = ctx
        .runtime
        .read(&ctx.source, request)
        .await
        .map_err(SyncError::from_source)?;

    loop {
        let next = tokio::select! {
            biased;
            () = ctx.control.token().cancelled() => return Err(cancelled(&ctx.control)),
            next = reader.next_batch() => next.map_err(SyncError::from_source)?,
        };
        let Some(batch) = next else {
            return Ok(());
        };

        if let Some(checkpoint) = &batch.checkpoint {
            let floor = copy.last_ack.as_ref().or(job.stored.as_ref());
            ensure_monotonic(&job.config.name, floor, checkpoint)?;
        }

        let ack = ctx
            .destination
            .write(&job.target, &batch)
            .await
            .map_err(SyncError::from_destination)?;
        ctx.progress
            .add_written(name, ack.records_written, ack.bytes_written);
        copy.acked_batches += 1;
        copy.failures = 0;
        if batch.checkpoint.is_some() {
            copy.last_ack = batch.checkpoint;
        }
        tracing::debug!(
            stream = name,
            records = ack.records_written,
            bytes = ack.bytes_written,
            "Batch acknowledged"
        );
    }
}

async fn abort_quietly(ctx: &WorkerContext, target: &WriteTarget) {
    if let Err(e) = ctx.destination.abort(target).await {
        tracing::warn!(
            stream = target.stream.as_str(),
            error = %e,
            "Destination abort failed"
        );
    }
}

fn cancelled(control: &RunControl) -> SyncError {
    SyncError::Cancelled(control.reason().cloned().unwrap_or(CancelReason::Operator))
}

/// Build the destination target for a stream of a run.
pub(crate) fn write_target(
    destination: &str,
    connection: &ConnectionId,
    config: &StreamConfig,
    run_id: RunId,
) -> WriteTarget {
    WriteTarget {
        destination: destination.to_string(),
        connection_id: connection.clone(),
        stream: config.name.clone(),
        mode: config.destination_sync_mode,
        primary_key: config.primary_key.clone(),
        run_id,
    }
}
