//! Cron-driven trigger loop.
//!
//! Each tick claims due schedules by compare-and-swap on `next_run_at`
//! before triggering, so replicas never double-fire a slot. The
//! coordinator's lock absorbs anything that slips through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_state::StateBackend;
use conduit_types::connection::ConnectionStatus;
use conduit_types::run::{SyncRun, TriggerMode};
use conduit_types::schedule::Schedule;
use conduit_types::state::ConnectionId;
use tokio_util::sync::CancellationToken;

use crate::cron::{next_occurrence, CronError};
use crate::errors::SyncError;
use crate::store::with_state;

/// Entry point the scheduler fires into.
#[async_trait]
pub trait SyncTrigger: Send + Sync {
    async fn trigger(
        &self,
        connection: &ConnectionId,
        mode: TriggerMode,
    ) -> Result<SyncRun, SyncError>;

    /// Finalize runs abandoned by crashed instances. Returns how many were
    /// recovered.
    async fn recover_stale_runs(&self, _now: DateTime<Utc>) -> Result<usize, SyncError> {
        Ok(0)
    }
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Connections a run was started for.
    pub fired: Vec<ConnectionId>,
    /// Due schedules of paused connections, advanced without a run.
    pub skipped_paused: usize,
    /// Due schedules another replica claimed first.
    pub lost_claim: usize,
    /// Schedules disabled because their cron expression or timezone is invalid.
    pub disabled: usize,
    /// Triggers refused by the coordinator (sync already running).
    pub rejected: usize,
}

pub struct Scheduler {
    state: Arc<dyn StateBackend>,
    trigger: Arc<dyn SyncTrigger>,
    tick: Duration,
}

impl Scheduler {
    #[must_use]
    pub fn new(state: Arc<dyn StateBackend>, trigger: Arc<dyn SyncTrigger>, tick: Duration) -> Self {
        Self {
            state,
            trigger,
            tick,
        }
    }

    /// Tick every `tick` until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(tick_secs = self.tick.as_secs(), "Scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.tick(Utc::now()).await {
                Ok(report) if !report.fired.is_empty() => {
                    tracing::info!(fired = report.fired.len(), "Scheduler tick fired runs");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Scheduler tick failed"),
            }
        }
        tracing::info!("Scheduler stopped");
    }

    /// Process every schedule due at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::State`] if the due schedules cannot be listed.
    /// Per-schedule failures are logged and do not stop the tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, SyncError> {
        match self.trigger.recover_stale_runs(now).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(recovered = n, "Recovered stale sync runs"),
            Err(e) => tracing::error!(error = %e, "Stale run recovery failed"),
        }

        let due = with_state(&self.state, move |s| s.list_due(now)).await?;
        let mut report = TickReport::default();
        for schedule in due {
            if let Err(e) = self.fire(&schedule, now, &mut report).await {
                tracing::error!(
                    connection = schedule.connection_id.as_str(),
                    error = %e,
                    "Scheduled trigger failed"
                );
            }
        }
        Ok(report)
    }

    async fn fire(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), SyncError> {
        let connection = schedule.connection_id.clone();
        let Some(expected) = schedule.next_run_at else {
            return Ok(());
        };

        let next = match next_occurrence(&schedule.cron, &schedule.timezone, now) {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!(
                    connection = connection.as_str(),
                    cron = schedule.cron.as_str(),
                    timezone = schedule.timezone.as_str(),
                    error = %err,
                    "Invalid schedule, disabling"
                );
                let id = connection.clone();
                with_state(&self.state, move |s| s.disable_schedule(&id, now)).await?;
                report.disabled += 1;
                return Ok(());
            }
        };

        let id = connection.clone();
        let (claimed, status) = with_state(&self.state, move |s| {
            if !s.claim_next_run(&id, expected, next, now)? {
                return Ok((false, None));
            }
            let status = s.get_connection(&id)?.map(|c| c.status);
            Ok((true, status))
        })
        .await?;
        if !claimed {
            tracing::debug!(connection = connection.as_str(), "Schedule claimed by another scheduler");
            report.lost_claim += 1;
            return Ok(());
        }

        match status {
            None => {
                tracing::warn!(connection = connection.as_str(), "Schedule refers to a missing connection");
                return Ok(());
            }
            Some(ConnectionStatus::Paused) => {
                tracing::debug!(connection = connection.as_str(), "Connection paused, skipping scheduled run");
                report.skipped_paused += 1;
                return Ok(());
            }
            Some(_) => {}
        }

        match self.trigger.trigger(&connection, TriggerMode::Scheduled).await {
            Ok(run) => {
                tracing::info!(
                    connection = connection.as_str(),
                    run_id = run.id.get(),
                    "Scheduled sync triggered"
                );
                report.fired.push(connection);
                Ok(())
            }
            Err(SyncError::LockConflict(reason)) => {
                tracing::info!(
                    connection = connection.as_str(),
                    reason = %reason,
                    "Scheduled sync skipped"
                );
                report.rejected += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Create or replace a connection's schedule, computing its next run.
    ///
    /// # Errors
    ///
    /// * [`SyncError::Validation`] if the cron expression or timezone is invalid.
    /// * [`SyncError::NotFound`] for an unknown connection.
    pub async fn put_schedule(
        &self,
        connection: &ConnectionId,
        cron: &str,
        timezone: &str,
        is_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Schedule, SyncError> {
        let next = next_occurrence(cron, timezone, now).map_err(|e: CronError| {
            SyncError::Validation(vec![e.to_string()])
        })?;
        let schedule = Schedule {
            connection_id: connection.clone(),
            cron: cron.trim().to_string(),
            timezone: timezone.to_string(),
            is_enabled,
            next_run_at: if is_enabled { next } else { None },
            updated_at: now,
        };

        let id = connection.clone();
        let stored = schedule.clone();
        let exists = with_state(&self.state, move |s| {
            if s.get_connection(&id)?.is_none() {
                return Ok(false);
            }
            s.put_schedule(&stored)?;
            Ok(true)
        })
        .await?;
        if !exists {
            return Err(SyncError::not_found("connection", connection));
        }

        tracing::info!(
            connection = connection.as_str(),
            cron = schedule.cron.as_str(),
            timezone = schedule.timezone.as_str(),
            enabled = is_enabled,
            next_run_at = ?schedule.next_run_at,
            "Schedule updated"
        );
        Ok(schedule)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the connection has no schedule.
    pub async fn get_schedule(&self, connection: &ConnectionId) -> Result<Schedule, SyncError> {
        let id = connection.clone();
        with_state(&self.state, move |s| s.get_schedule(&id))
            .await?
            .ok_or_else(|| SyncError::not_found("schedule", connection))
    }
}
