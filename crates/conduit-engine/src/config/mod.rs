//! Engine configuration and connection manifests loaded from YAML.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_connections, parse_connections_str, parse_engine_config, parse_engine_config_str};
pub use types::{ConnectionManifest, EngineConfig, ManifestConnection, ManifestSchedule};
pub use validator::{validate_engine_config, validate_manifest};
