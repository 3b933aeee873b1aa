//! Engine config and connection manifest validation.

use std::collections::HashSet;

use anyhow::Result;

use crate::config::types::{ConnectionManifest, EngineConfig};
use crate::cron::{parse_timezone, CronExpr};
use crate::registry::ConnectorRegistry;
use crate::validator::check_streams;

/// Validate engine settings. Collects all errors and returns them together.
///
/// # Errors
///
/// Returns an error listing every invalid setting.
pub fn validate_engine_config(config: &EngineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.state.path.as_os_str().is_empty() {
        errors.push("state.path must not be empty".to_string());
    }
    if config.coordinator.max_concurrency == 0 {
        errors.push("coordinator.max_concurrency must be at least 1".to_string());
    }
    if config.coordinator.max_run_duration_secs == 0 {
        errors.push("coordinator.max_run_duration_secs must be greater than 0".to_string());
    }
    if config.coordinator.cancel_poll_ms == 0 {
        errors.push("coordinator.cancel_poll_ms must be greater than 0".to_string());
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        errors.push(format!(
            "retry.max_delay_ms ({}) must not be less than retry.base_delay_ms ({})",
            config.retry.max_delay_ms, config.retry.base_delay_ms
        ));
    }
    if config.scheduler.tick_secs == 0 {
        errors.push("scheduler.tick_secs must be greater than 0".to_string());
    }
    if config.api.listen.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "api.listen '{}' is not a valid socket address",
            config.api.listen
        ));
    }
    if config.destination.path.as_os_str().is_empty() {
        errors.push("destination.path must not be empty".to_string());
    }
    if config.credentials.env_prefix.trim().is_empty() {
        errors.push("credentials.env_prefix must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "Engine config validation failed:\n  - {}",
            errors.join("\n  - ")
        )
    }
}

/// Validate a connection manifest against the registered connectors.
///
/// # Errors
///
/// Returns an error listing every problem, prefixed by connection name.
pub fn validate_manifest(manifest: &ConnectionManifest, registry: &ConnectorRegistry) -> Result<()> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();

    for conn in &manifest.connections {
        let label = if conn.name.trim().is_empty() {
            errors.push("Connection name must not be empty".to_string());
            "<unnamed>"
        } else {
            conn.name.as_str()
        };
        if !conn.name.trim().is_empty() && !names.insert(conn.name.as_str()) {
            errors.push(format!("Duplicate connection name '{label}'"));
        }
        if conn.destination.trim().is_empty() {
            errors.push(format!("{label}: destination must not be empty"));
        }

        match registry.spec(&conn.connector) {
            Some(spec) => {
                let mut stream_errors = Vec::new();
                check_streams(spec, &conn.streams, &mut stream_errors);
                errors.extend(stream_errors.into_iter().map(|e| format!("{label}: {e}")));
            }
            None => errors.push(format!(
                "{label}: unknown connector kind '{}'",
                conn.connector
            )),
        }

        if let Some(schedule) = &conn.schedule {
            if let Err(e) = CronExpr::parse(&schedule.cron) {
                errors.push(format!("{label}: {e}"));
            }
            if let Err(e) = parse_timezone(&schedule.timezone) {
                errors.push(format!("{label}: {e}"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "Connection manifest validation failed:\n  - {}",
            errors.join("\n  - ")
        )
    }
}
