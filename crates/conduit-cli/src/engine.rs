//! Wiring of state, connectors, coordinator and scheduler from an
//! [`EngineConfig`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use conduit_api::AppState;
use conduit_engine::config::{parse_engine_config, validate_engine_config, EngineConfig};
use conduit_engine::runtime::EnvCredentialResolver;
use conduit_engine::{
    ConnectionService, ConnectorRegistry, Coordinator, Scheduler, SyncError,
};
use conduit_state::{SqliteStateBackend, StateBackend};
use conduit_types::connection::Connection;
use conduit_types::state::ConnectionId;
use dest_sqlite::SqliteDestination;
use source_jsonl::JsonlSource;

/// Load and validate the engine config, or use defaults without a file.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => parse_engine_config(path)
            .with_context(|| format!("Failed to load engine config: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    validate_engine_config(&config)?;
    Ok(config)
}

/// Built-in connector kinds.
pub fn build_registry(config: &EngineConfig) -> Result<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();
    registry
        .register(
            JsonlSource::spec(),
            Arc::new(JsonlSource::new(&config.source_jsonl.root)),
        )
        .context("Failed to register source-jsonl")?;
    Ok(registry)
}

pub struct Engine {
    pub config: EngineConfig,
    pub coordinator: Coordinator,
    pub connections: ConnectionService,
    pub scheduler: Arc<Scheduler>,
}

impl Engine {
    pub fn build(config: EngineConfig) -> Result<Self> {
        let state: Arc<dyn StateBackend> = Arc::new(
            SqliteStateBackend::open(&config.state.path).with_context(|| {
                format!("Failed to open state database: {}", config.state.path.display())
            })?,
        );
        let registry = Arc::new(build_registry(&config)?);
        let destination = SqliteDestination::open(&config.destination.path).with_context(|| {
            format!(
                "Failed to open destination database: {}",
                config.destination.path.display()
            )
        })?;

        let coordinator = Coordinator::new(
            Arc::clone(&state),
            Arc::clone(&registry),
            Arc::new(destination),
            Arc::new(EnvCredentialResolver::new(&config.credentials.env_prefix)),
            config.coordinator_config(),
        );
        let connections = ConnectionService::new(Arc::clone(&state), registry);
        let scheduler = Arc::new(Scheduler::new(
            state,
            Arc::new(coordinator.clone()),
            Duration::from_secs(config.scheduler.tick_secs),
        ));

        tracing::debug!(
            state = %config.state.path.display(),
            destination = %config.destination.path.display(),
            "Engine initialized"
        );
        Ok(Self {
            config,
            coordinator,
            connections,
            scheduler,
        })
    }

    pub fn api_state(&self) -> AppState {
        AppState {
            coordinator: self.coordinator.clone(),
            connections: self.connections.clone(),
            scheduler: Arc::clone(&self.scheduler),
        }
    }

    /// Look a connection up by id, falling back to its name.
    pub async fn resolve_connection(&self, reference: &str) -> Result<Connection> {
        match self.connections.get(&ConnectionId::new(reference)).await {
            Ok(connection) => return Ok(connection),
            Err(SyncError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        let mut matches: Vec<Connection> = self
            .connections
            .list()
            .await?
            .into_iter()
            .filter(|c| c.name == reference)
            .collect();
        match matches.len() {
            0 => bail!("No connection with id or name '{reference}'"),
            1 => Ok(matches.remove(0)),
            n => bail!("{n} connections are named '{reference}'; use the connection id"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.state.path = dir.join("state.db");
        config.destination.path = dir.join("warehouse.db");
        config.source_jsonl.root = dir.join("data");
        config
    }

    #[test]
    fn registry_contains_builtin_source() {
        let registry = build_registry(&EngineConfig::default()).unwrap();
        assert!(registry.spec("source-jsonl").is_some());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/conduit.yaml"))).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load engine config"));
    }

    #[tokio::test]
    async fn resolves_connections_by_id_or_name() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::build(temp_config(dir.path())).unwrap();
        let created = engine
            .connections
            .create(conduit_types::connection::NewConnection {
                name: "orders".into(),
                connector_kind: "source-jsonl".into(),
                destination: "warehouse".into(),
                config: serde_json::Value::Null,
                streams: Vec::new(),
            })
            .await
            .unwrap();

        let by_id = engine.resolve_connection(created.id.as_str()).await.unwrap();
        let by_name = engine.resolve_connection("orders").await.unwrap();
        assert_eq!(by_id.id, by_name.id);
        assert!(engine.resolve_connection("missing").await.is_err());
    }
}
