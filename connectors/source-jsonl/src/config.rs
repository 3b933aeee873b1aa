//! Source JSON-lines connector configuration.

use std::path::{Path, PathBuf};

use conduit_types::error::ConnectorError;
use serde::Deserialize;

/// Per-connection settings from `Connection::config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding `<stream>.jsonl` files. Falls back to the engine's
    /// `source_jsonl.root` when absent.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: None,
            batch_size: default_batch_size(),
        }
    }
}

impl Config {
    /// Parse and validate a connection's config value. `null` and `{}` both
    /// yield the defaults.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConnectorError> {
        let config: Self = if value.is_null() {
            Self::default()
        } else {
            serde_json::from_value(value.clone()).map_err(|e| {
                ConnectorError::config("INVALID_CONFIG", format!("invalid source-jsonl config: {e}"))
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.batch_size == 0 {
            return Err(ConnectorError::config(
                "INVALID_CONFIG",
                "batch_size must be at least 1",
            ));
        }
        if self.root.as_ref().is_some_and(|r| r.as_os_str().is_empty()) {
            return Err(ConnectorError::config(
                "INVALID_CONFIG",
                "root must not be empty",
            ));
        }
        Ok(())
    }

    /// The directory to read from, checked to exist.
    pub fn resolve_root(&self, default_root: &Path) -> Result<PathBuf, ConnectorError> {
        let root = self.root.clone().unwrap_or_else(|| default_root.to_path_buf());
        if !root.is_dir() {
            return Err(ConnectorError::config(
                "ROOT_NOT_FOUND",
                format!("data directory '{}' does not exist", root.display()),
            ));
        }
        Ok(root)
    }
}

/// Stream names map to file names, so they may not escape the root.
pub fn validate_stream_name(name: &str) -> Result<(), ConnectorError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ConnectorError::config(
            "INVALID_STREAM",
            format!("stream name '{name}' is not a valid file stem"),
        ))
    }
}
