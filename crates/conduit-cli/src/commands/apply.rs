use std::path::Path;

use anyhow::{bail, Context, Result};
use conduit_engine::config::{parse_connections, validate_manifest, ConnectionManifest};
use conduit_types::connection::{ConnectionPatch, NewConnection};

use crate::engine::Engine;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub schedules: usize,
}

/// Execute the `apply` command: upsert every connection in a manifest by name.
pub async fn execute(engine: &Engine, manifest_path: &Path) -> Result<()> {
    let manifest = parse_connections(manifest_path)
        .with_context(|| format!("Failed to parse manifest: {}", manifest_path.display()))?;
    let summary = apply_manifest(engine, &manifest).await?;
    println!(
        "Applied {}: {} created, {} updated, {} unchanged, {} schedule(s) set.",
        manifest_path.display(),
        summary.created,
        summary.updated,
        summary.unchanged,
        summary.schedules
    );
    Ok(())
}

pub async fn apply_manifest(engine: &Engine, manifest: &ConnectionManifest) -> Result<ApplySummary> {
    validate_manifest(manifest, engine.coordinator.registry())?;

    let existing = engine.connections.list().await?;
    let mut summary = ApplySummary::default();

    for entry in &manifest.connections {
        let current = existing.iter().find(|c| c.name == entry.name);
        let connection = match current {
            Some(current) if current.connector_kind != entry.connector => bail!(
                "Connection '{}' uses connector '{}'; delete it before switching to '{}'",
                entry.name,
                current.connector_kind,
                entry.connector
            ),
            Some(current)
                if current.destination == entry.destination
                    && current.config == entry.config
                    && current.streams == entry.streams =>
            {
                summary.unchanged += 1;
                current.clone()
            }
            Some(current) => {
                let patch = ConnectionPatch {
                    name: None,
                    destination: Some(entry.destination.clone()),
                    config: Some(entry.config.clone()),
                    streams: Some(entry.streams.clone()),
                };
                let updated = engine
                    .connections
                    .update(&current.id, patch)
                    .await
                    .with_context(|| format!("Failed to update connection '{}'", entry.name))?;
                summary.updated += 1;
                updated
            }
            None => {
                let created = engine
                    .connections
                    .create(NewConnection {
                        name: entry.name.clone(),
                        connector_kind: entry.connector.clone(),
                        destination: entry.destination.clone(),
                        config: entry.config.clone(),
                        streams: entry.streams.clone(),
                    })
                    .await
                    .with_context(|| format!("Failed to create connection '{}'", entry.name))?;
                summary.created += 1;
                created
            }
        };

        if let Some(schedule) = &entry.schedule {
            engine
                .scheduler
                .put_schedule(
                    &connection.id,
                    &schedule.cron,
                    &schedule.timezone,
                    schedule.enabled,
                    chrono::Utc::now(),
                )
                .await
                .with_context(|| format!("Failed to set schedule of '{}'", entry.name))?;
            summary.schedules += 1;
        }

        tracing::info!(
            connection = connection.id.as_str(),
            name = entry.name.as_str(),
            "Connection applied"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_engine::config::{parse_connections_str, EngineConfig};

    const MANIFEST: &str = r#"
connections:
  - name: users
    connector: source-jsonl
    destination: warehouse
    streams:
      - name: users
        sync_mode: incremental
        destination_sync_mode: append_dedup
        cursor_field: updated_at
        primary_key: [id]
    schedule:
      cron: "*/15 * * * *"
"#;

    fn engine(dir: &Path) -> Engine {
        let mut config = EngineConfig::default();
        config.state.path = dir.join("state.db");
        config.destination.path = dir.join("warehouse.db");
        config.source_jsonl.root = dir.to_path_buf();
        Engine::build(config).unwrap()
    }

    #[tokio::test]
    async fn apply_is_idempotent_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let manifest = parse_connections_str(MANIFEST).unwrap();

        let first = apply_manifest(&engine, &manifest).await.unwrap();
        assert_eq!(
            first,
            ApplySummary {
                created: 1,
                schedules: 1,
                ..ApplySummary::default()
            }
        );

        let second = apply_manifest(&engine, &manifest).await.unwrap();
        assert_eq!(second.unchanged, 1);
        assert_eq!(engine.connections.list().await.unwrap().len(), 1);

        let connection = engine.resolve_connection("users").await.unwrap();
        let schedule = engine.scheduler.get_schedule(&connection.id).await.unwrap();
        assert_eq!(schedule.timezone, "UTC");
        assert!(schedule.next_run_at.is_some());
    }

    #[tokio::test]
    async fn changed_destination_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        apply_manifest(&engine, &parse_connections_str(MANIFEST).unwrap())
            .await
            .unwrap();

        let changed = MANIFEST.replace("destination: warehouse", "destination: lake");
        let summary = apply_manifest(&engine, &parse_connections_str(&changed).unwrap())
            .await
            .unwrap();
        assert_eq!(summary.updated, 1);
        let connection = engine.resolve_connection("users").await.unwrap();
        assert_eq!(connection.destination, "lake");
    }

    #[tokio::test]
    async fn invalid_manifest_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let bad = MANIFEST.replace("connector: source-jsonl", "connector: nope");
        let err = apply_manifest(&engine, &parse_connections_str(&bad).unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown connector kind"), "{err}");
        assert!(engine.connections.list().await.unwrap().is_empty());
    }
}
