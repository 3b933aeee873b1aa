//! Static catalog of connector kinds.

use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_types::wire::{AuthType, Feature};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;
use crate::runtime::ConnectorRuntime;

/// Declared capabilities of a connector kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    /// Registry key, referenced by `Connection::connector_kind`.
    pub id: String,
    pub display_name: String,
    pub auth_type: AuthType,
    pub features: Vec<Feature>,
    /// Upper bound on streams read concurrently within one run.
    pub max_concurrent_streams: usize,
}

impl ConnectorSpec {
    #[must_use]
    pub fn supports(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

struct RegisteredConnector {
    spec: ConnectorSpec,
    runtime: Arc<dyn ConnectorRuntime>,
}

/// Connector kinds known to this process. Built once at start-up and shared
/// immutably afterwards.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, RegisteredConnector>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector kind.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] for a duplicate id, an empty id, or a
    /// zero stream limit.
    pub fn register(
        &mut self,
        spec: ConnectorSpec,
        runtime: Arc<dyn ConnectorRuntime>,
    ) -> Result<(), SyncError> {
        let mut errors = Vec::new();
        if spec.id.trim().is_empty() {
            errors.push("Connector id must not be empty".to_string());
        }
        if self.connectors.contains_key(&spec.id) {
            errors.push(format!("Connector '{}' is already registered", spec.id));
        }
        if spec.max_concurrent_streams == 0 {
            errors.push(format!(
                "Connector '{}' must allow at least one concurrent stream",
                spec.id
            ));
        }
        if !errors.is_empty() {
            return Err(SyncError::Validation(errors));
        }
        tracing::debug!(connector = spec.id, "Registered connector");
        self.connectors
            .insert(spec.id.clone(), RegisteredConnector { spec, runtime });
        Ok(())
    }

    #[must_use]
    pub fn spec(&self, kind: &str) -> Option<&ConnectorSpec> {
        self.connectors.get(kind).map(|c| &c.spec)
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<(&ConnectorSpec, Arc<dyn ConnectorRuntime>)> {
        self.connectors
            .get(kind)
            .map(|c| (&c.spec, Arc::clone(&c.runtime)))
    }

    /// All registered specs, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<ConnectorSpec> {
        self.connectors.values().map(|c| c.spec.clone()).collect()
    }
}
