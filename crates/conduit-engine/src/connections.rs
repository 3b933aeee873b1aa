//! Validated connection administration.

use std::sync::Arc;

use chrono::Utc;
use conduit_state::{StateBackend, WriteOutcome};
use conduit_types::connection::{
    Connection, ConnectionPatch, ConnectionStatus, NewConnection, StreamConfig,
};
use conduit_types::state::{ConnectionId, StreamCursor, StreamName};

use crate::errors::{Rejected, SyncError};
use crate::registry::ConnectorRegistry;
use crate::store::with_state;
use crate::validator::{validate_connection, validate_new_connection};

/// Create, update and delete connections and their stream configs.
///
/// Writes that a running sync depends on are refused while the connection
/// is `syncing`.
#[derive(Clone)]
pub struct ConnectionService {
    state: Arc<dyn StateBackend>,
    registry: Arc<ConnectorRegistry>,
}

impl ConnectionService {
    #[must_use]
    pub fn new(state: Arc<dyn StateBackend>, registry: Arc<ConnectorRegistry>) -> Self {
        Self { state, registry }
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] listing every configuration problem.
    pub async fn create(&self, new: NewConnection) -> Result<Connection, SyncError> {
        validate_new_connection(&self.registry, &new)?;

        let now = Utc::now();
        let connection = Connection {
            id: ConnectionId::generate(),
            name: new.name,
            connector_kind: new.connector_kind,
            destination: new.destination,
            config: new.config,
            status: ConnectionStatus::Pending,
            schema_change: false,
            error_message: None,
            streams: new.streams,
            created_at: now,
            updated_at: now,
        };
        let stored = connection.clone();
        with_state(&self.state, move |s| s.insert_connection(&stored)).await?;

        tracing::info!(
            connection = connection.id.as_str(),
            name = connection.name.as_str(),
            connector = connection.connector_kind.as_str(),
            streams = connection.streams.len(),
            "Connection created"
        );
        Ok(connection)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown connection.
    pub async fn get(&self, id: &ConnectionId) -> Result<Connection, SyncError> {
        let key = id.clone();
        with_state(&self.state, move |s| s.get_connection(&key))
            .await?
            .ok_or_else(|| SyncError::not_found("connection", id))
    }

    /// # Errors
    ///
    /// Returns [`SyncError::State`] on storage failure.
    pub async fn list(&self) -> Result<Vec<Connection>, SyncError> {
        with_state(&self.state, |s| s.list_connections()).await
    }

    /// Apply a partial update.
    ///
    /// Streams whose sync mode or cursor field changed, and streams that were
    /// removed, have their cursors reset.
    ///
    /// # Errors
    ///
    /// * [`SyncError::Validation`] if the result is invalid.
    /// * [`SyncError::LockConflict`] if the patch touches streams, config or
    ///   destination while the connection is syncing.
    /// * [`SyncError::NotFound`] for an unknown connection.
    pub async fn update(
        &self,
        id: &ConnectionId,
        patch: ConnectionPatch,
    ) -> Result<Connection, SyncError> {
        let current = self.get(id).await?;
        let only_if_idle = patch.touches_sync_inputs();

        let mut next = current.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(destination) = patch.destination {
            next.destination = destination;
        }
        if let Some(config) = patch.config {
            next.config = config;
        }
        if let Some(streams) = patch.streams {
            next.streams = streams;
        }
        next.updated_at = Utc::now();

        self.store_update(&current, next, only_if_idle).await
    }

    /// Add a stream config or replace the one with the same name.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionService::update`].
    pub async fn upsert_stream(
        &self,
        id: &ConnectionId,
        stream: StreamConfig,
    ) -> Result<Connection, SyncError> {
        let current = self.get(id).await?;
        let mut next = current.clone();
        match next.streams.iter_mut().find(|s| s.name == stream.name) {
            Some(existing) => *existing = stream,
            None => next.streams.push(stream),
        }
        next.updated_at = Utc::now();
        self.store_update(&current, next, true).await
    }

    /// Remove a stream config and its cursor.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotFound`] if the stream is not configured, otherwise
    /// the same as [`ConnectionService::update`].
    pub async fn remove_stream(
        &self,
        id: &ConnectionId,
        stream: &StreamName,
    ) -> Result<Connection, SyncError> {
        let current = self.get(id).await?;
        if current.stream(stream).is_none() {
            return Err(SyncError::not_found("stream", stream));
        }
        let mut next = current.clone();
        next.streams.retain(|s| &s.name != stream);
        next.updated_at = Utc::now();
        self.store_update(&current, next, true).await
    }

    async fn store_update(
        &self,
        current: &Connection,
        next: Connection,
        only_if_idle: bool,
    ) -> Result<Connection, SyncError> {
        validate_connection(
            &self.registry,
            &next.name,
            &next.connector_kind,
            &next.destination,
            &next.streams,
        )?;

        let invalidated = invalidated_streams(&current.streams, &next.streams);
        let stored = next.clone();
        let outcome = with_state(&self.state, move |s| {
            s.update_connection(&stored, only_if_idle, &invalidated)
        })
        .await?;

        match outcome {
            WriteOutcome::Applied => {
                tracing::info!(connection = next.id.as_str(), "Connection updated");
                // Re-read so status fields owned by the coordinator are current.
                self.get(&next.id).await
            }
            WriteOutcome::NotFound => Err(SyncError::not_found("connection", &next.id)),
            WriteOutcome::Rejected => Err(SyncError::LockConflict(Rejected::Syncing)),
        }
    }

    /// Delete a connection, its cursors and its schedule. Run history is kept.
    ///
    /// # Errors
    ///
    /// * [`SyncError::LockConflict`] while the connection is syncing.
    /// * [`SyncError::NotFound`] for an unknown connection.
    pub async fn delete(&self, id: &ConnectionId) -> Result<(), SyncError> {
        let key = id.clone();
        match with_state(&self.state, move |s| s.delete_connection(&key)).await? {
            WriteOutcome::Applied => {
                tracing::info!(connection = id.as_str(), "Connection deleted");
                Ok(())
            }
            WriteOutcome::NotFound => Err(SyncError::not_found("connection", id)),
            WriteOutcome::Rejected => Err(SyncError::LockConflict(Rejected::Syncing)),
        }
    }

    /// Pause or resume a connection. Resuming clears the retained error.
    ///
    /// # Errors
    ///
    /// * [`SyncError::Validation`] for any status other than `active` or `paused`.
    /// * [`SyncError::LockConflict`] while the connection is syncing.
    /// * [`SyncError::NotFound`] for an unknown connection.
    pub async fn set_status(
        &self,
        id: &ConnectionId,
        status: ConnectionStatus,
    ) -> Result<Connection, SyncError> {
        if !matches!(status, ConnectionStatus::Active | ConnectionStatus::Paused) {
            return Err(SyncError::Validation(vec![format!(
                "Status can only be set to 'active' or 'paused', not '{status}'"
            )]));
        }
        let key = id.clone();
        match with_state(&self.state, move |s| s.set_status(&key, status, Utc::now())).await? {
            WriteOutcome::Applied => {
                tracing::info!(connection = id.as_str(), status = %status, "Connection status changed");
                self.get(id).await
            }
            WriteOutcome::NotFound => Err(SyncError::not_found("connection", id)),
            WriteOutcome::Rejected => Err(SyncError::LockConflict(Rejected::Syncing)),
        }
    }

    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown connection.
    pub async fn list_cursors(&self, id: &ConnectionId) -> Result<Vec<StreamCursor>, SyncError> {
        let key = id.clone();
        let (exists, cursors) = with_state(&self.state, move |s| {
            let exists = s.get_connection(&key)?.is_some();
            let cursors = if exists { s.list_cursors(&key)? } else { Vec::new() };
            Ok((exists, cursors))
        })
        .await?;
        if exists {
            Ok(cursors)
        } else {
            Err(SyncError::not_found("connection", id))
        }
    }

    /// Clear cursor state so the next run re-reads from the beginning.
    ///
    /// With `stream` set only that stream is reset; otherwise every stream is,
    /// and the schema drift flag is cleared. Returns how many cursors were
    /// removed.
    ///
    /// # Errors
    ///
    /// * [`SyncError::LockConflict`] while the connection is syncing.
    /// * [`SyncError::NotFound`] for an unknown connection.
    pub async fn reset(
        &self,
        id: &ConnectionId,
        stream: Option<StreamName>,
    ) -> Result<u64, SyncError> {
        let key = id.clone();
        let scope = stream.clone();
        let (outcome, removed) = with_state(&self.state, move |s| {
            s.reset_cursors_if_idle(&key, scope.as_ref(), Utc::now())
        })
        .await?;
        match outcome {
            WriteOutcome::Applied => {}
            WriteOutcome::NotFound => return Err(SyncError::not_found("connection", id)),
            WriteOutcome::Rejected => return Err(SyncError::LockConflict(Rejected::Syncing)),
        }

        tracing::info!(
            connection = id.as_str(),
            stream = ?stream,
            removed,
            "Cursor state reset"
        );
        Ok(removed)
    }
}

/// Streams whose committed cursor no longer applies after a reconfiguration.
fn invalidated_streams(current: &[StreamConfig], next: &[StreamConfig]) -> Vec<StreamName> {
    current
        .iter()
        .filter(|old| match next.iter().find(|s| s.name == old.name) {
            Some(new) => old.invalidates_cursor(new),
            None => true,
        })
        .map(|old| old.name.clone())
        .collect()
}
