use std::path::PathBuf;
use std::time::Duration;

use conduit_types::connection::StreamConfig;
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::errors::RetryPolicy;

/// Process-wide engine settings (`conduit.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub source_jsonl: SourceJsonlSection,
    #[serde(default)]
    pub destination: DestinationSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
}

impl EngineConfig {
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrency: self.coordinator.max_concurrency,
            max_run_duration: Duration::from_secs(self.coordinator.max_run_duration_secs),
            stale_grace: Duration::from_secs(self.coordinator.stale_grace_secs),
            cancel_poll: Duration::from_millis(self.coordinator.cancel_poll_ms),
            retry: self.retry_policy(),
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSection {
    /// SQLite database holding connections, cursors, schedules and runs.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("conduit.db")
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_run_duration_secs")]
    pub max_run_duration_secs: u64,
    #[serde(default = "default_stale_grace_secs")]
    pub stale_grace_secs: u64,
    #[serde(default = "default_cancel_poll_ms")]
    pub cancel_poll_ms: u64,
}

fn default_max_concurrency() -> usize {
    8
}
fn default_max_run_duration_secs() -> u64 {
    6 * 60 * 60
}
fn default_stale_grace_secs() -> u64 {
    600
}
fn default_cancel_poll_ms() -> u64 {
    2_000
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_run_duration_secs: default_max_run_duration_secs(),
            stale_grace_secs: default_stale_grace_secs(),
            cancel_poll_ms: default_cancel_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_tick_secs() -> u64 {
    60
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_tick_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceJsonlSection {
    /// Directory holding `<stream>.jsonl` files; connections may override it.
    #[serde(default = "default_jsonl_root")]
    pub root: PathBuf,
}

fn default_jsonl_root() -> PathBuf {
    PathBuf::from("data")
}

impl Default for SourceJsonlSection {
    fn default() -> Self {
        Self {
            root: default_jsonl_root(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSection {
    /// SQLite warehouse file the destination writes into.
    #[serde(default = "default_destination_path")]
    pub path: PathBuf,
}

fn default_destination_path() -> PathBuf {
    PathBuf::from("warehouse.db")
}

impl Default for DestinationSection {
    fn default() -> Self {
        Self {
            path: default_destination_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsSection {
    /// Secrets are read from `<env_prefix><CONNECTION_ID>`.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
}

fn default_env_prefix() -> String {
    "CONDUIT_SECRET_".to_string()
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            env_prefix: default_env_prefix(),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection manifests
// ---------------------------------------------------------------------------

/// Declarative set of connections applied with `conduit apply`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionManifest {
    #[serde(default)]
    pub connections: Vec<ManifestConnection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConnection {
    /// Display name; also the key `apply` matches existing connections on.
    pub name: String,
    pub connector: String,
    pub destination: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ManifestSchedule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSchedule {
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::wire::{DestinationSyncMode, SyncMode};

    #[test]
    fn test_empty_engine_config_uses_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.state.path, PathBuf::from("conduit.db"));
        assert_eq!(config.coordinator.max_concurrency, 8);
        assert_eq!(config.scheduler.tick_secs, 60);
        assert!(config.scheduler.enabled);
        assert_eq!(config.api.listen, "127.0.0.1:8080");
        assert_eq!(config.credentials.env_prefix, "CONDUIT_SECRET_");
    }

    #[test]
    fn test_coordinator_config_conversion() {
        let yaml = r"
coordinator:
  max_concurrency: 2
  max_run_duration_secs: 30
  cancel_poll_ms: 100
retry:
  max_retries: 5
  base_delay_ms: 10
";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.max_concurrency, 2);
        assert_eq!(coordinator.max_run_duration, Duration::from_secs(30));
        assert_eq!(coordinator.stale_grace, Duration::from_secs(600));
        assert_eq!(coordinator.cancel_poll, Duration::from_millis(100));
        assert_eq!(coordinator.retry.max_retries, 5);
        assert_eq!(coordinator.retry.base_delay, Duration::from_millis(10));
        assert_eq!(coordinator.retry.max_delay, Duration::from_millis(60_000));
    }

    #[test]
    fn test_deserialize_manifest() {
        let yaml = r#"
connections:
  - name: orders
    connector: source-jsonl
    destination: warehouse
    config:
      root: ./data
    streams:
      - name: orders
        sync_mode: incremental
        destination_sync_mode: append_dedup
        cursor_field: updated_at
        primary_key: [id]
      - name: customers
        sync_mode: full_refresh
        destination_sync_mode: overwrite
        enabled: false
    schedule:
      cron: "*/30 * * * *"
"#;
        let manifest: ConnectionManifest = serde_yaml::from_str(yaml).unwrap();
        let conn = &manifest.connections[0];
        assert_eq!(conn.streams.len(), 2);
        assert_eq!(conn.streams[0].sync_mode, SyncMode::Incremental);
        assert_eq!(
            conn.streams[0].destination_sync_mode,
            DestinationSyncMode::AppendDedup
        );
        assert!(!conn.streams[1].enabled);
        assert_eq!(conn.config["root"], "./data");
        let schedule = conn.schedule.as_ref().unwrap();
        assert_eq!(schedule.timezone, "UTC");
        assert!(schedule.enabled);
    }
}
