//! Source connector over a directory of JSON-lines files.
//!
//! Each `<stream>.jsonl` file under the configured root is one stream. Any
//! integer, RFC 3339 timestamp or string column can serve as an incremental
//! cursor.

pub mod config;
pub mod cursor;
pub mod discovery;
pub mod reader;

use std::path::PathBuf;

use async_trait::async_trait;
use conduit_engine::runtime::{BatchReader, ConnectorRuntime, ReadRequest, SourceContext};
use conduit_engine::ConnectorSpec;
use conduit_types::catalog::StreamSchema;
use conduit_types::error::ConnectorError;
use conduit_types::wire::{AuthType, Feature};

use crate::config::{validate_stream_name, Config};
use crate::reader::JsonlReader;

/// Registry id of this connector kind.
pub const CONNECTOR_ID: &str = "source-jsonl";

/// JSON-lines source. `default_root` applies to connections whose config
/// does not name a `root`.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    default_root: PathBuf,
}

impl JsonlSource {
    #[must_use]
    pub fn new(default_root: impl Into<PathBuf>) -> Self {
        Self {
            default_root: default_root.into(),
        }
    }

    /// Declared capabilities for registration.
    #[must_use]
    pub fn spec() -> ConnectorSpec {
        ConnectorSpec {
            id: CONNECTOR_ID.to_string(),
            display_name: "JSON lines files".to_string(),
            auth_type: AuthType::None,
            features: vec![Feature::Incremental],
            max_concurrent_streams: 4,
        }
    }

    fn settings(&self, source: &SourceContext) -> Result<(Config, PathBuf), ConnectorError> {
        let config = Config::from_value(&source.config)?;
        let root = config.resolve_root(&self.default_root)?;
        Ok((config, root))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ConnectorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ConnectorError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ConnectorError::internal("TASK_FAILED", format!("file task failed: {e}")))?
}

#[async_trait]
impl ConnectorRuntime for JsonlSource {
    async fn discover(&self, source: &SourceContext) -> Result<Vec<StreamSchema>, ConnectorError> {
        let (_, root) = self.settings(source)?;
        blocking(move || discovery::discover_catalog(&root)).await
    }

    async fn read(
        &self,
        source: &SourceContext,
        request: ReadRequest,
    ) -> Result<Box<dyn BatchReader>, ConnectorError> {
        let (config, root) = self.settings(source)?;
        validate_stream_name(request.stream.as_str())?;
        let path = root.join(format!("{}.{}", request.stream, discovery::EXTENSION));
        tracing::info!(
            connection = source.connection_id.as_str(),
            stream = request.stream.as_str(),
            "Opening JSON-lines stream"
        );
        let reader =
            blocking(move || JsonlReader::open(&path, &request, config.batch_size)).await?;
        Ok(Box::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_engine::runtime::Secret;
    use conduit_types::cursor::CursorValue;
    use conduit_types::state::{ConnectionId, StreamName};
    use conduit_types::wire::SyncMode;

    fn context(config: serde_json::Value) -> SourceContext {
        SourceContext {
            connection_id: ConnectionId::new("c1"),
            config,
            secret: Secret::empty(),
        }
    }

    #[test]
    fn spec_declares_incremental_without_auth() {
        let spec = JsonlSource::spec();
        assert_eq!(spec.id, CONNECTOR_ID);
        assert_eq!(spec.auth_type, AuthType::None);
        assert!(spec.supports(Feature::Incremental));
        assert!(!spec.supports(Feature::Cdc));
    }

    #[tokio::test]
    async fn config_root_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.jsonl"), "{\"id\":1}\n").unwrap();
        let source = JsonlSource::new("/nonexistent");

        let streams = source
            .discover(&context(serde_json::json!({"root": dir.path()})))
            .await
            .unwrap();
        assert_eq!(streams.len(), 1);

        let err = source.discover(&context(serde_json::json!({}))).await.unwrap_err();
        assert_eq!(err.code, "ROOT_NOT_FOUND");
    }

    #[tokio::test]
    async fn read_uses_configured_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("users.jsonl"),
            "{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n",
        )
        .unwrap();
        let source = JsonlSource::new(dir.path());
        let mut reader = source
            .read(
                &context(serde_json::json!({"batch_size": 2})),
                ReadRequest {
                    stream: StreamName::new("users"),
                    sync_mode: SyncMode::Incremental,
                    cursor_field: Some("id".into()),
                    cursor: None,
                },
            )
            .await
            .unwrap();

        let first = reader.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.checkpoint, Some(CursorValue::Int64 { value: 2 }));
        let second = reader.next_batch().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(reader.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn traversal_stream_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonlSource::new(dir.path());
        let result = source
            .read(
                &context(serde_json::Value::Null),
                ReadRequest {
                    stream: StreamName::new("../secrets"),
                    sync_mode: SyncMode::FullRefresh,
                    cursor_field: None,
                    cursor: None,
                },
            )
            .await;
        let err = result.err().unwrap();
        assert_eq!(err.code, "INVALID_STREAM");
    }
}
