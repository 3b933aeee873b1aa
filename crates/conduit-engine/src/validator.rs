//! Semantic validation for connections and their stream configs.
//!
//! Every check runs and all problems are reported together.

use std::collections::HashSet;

use conduit_types::connection::{NewConnection, StreamConfig};
use conduit_types::wire::{DestinationSyncMode, Feature, SyncMode};

use crate::errors::SyncError;
use crate::registry::{ConnectorRegistry, ConnectorSpec};

/// Collect problems with one stream config against its connector's spec.
pub fn check_stream(spec: &ConnectorSpec, stream: &StreamConfig, errors: &mut Vec<String>) {
    let name = stream.name.as_str();
    if name.trim().is_empty() {
        errors.push("Stream name must not be empty".to_string());
    }

    let has_cursor = stream
        .cursor_field
        .as_deref()
        .is_some_and(|f| !f.trim().is_empty());

    match stream.sync_mode {
        SyncMode::Incremental => {
            if !has_cursor {
                errors.push(format!(
                    "Stream '{name}' uses incremental sync but has no cursor_field"
                ));
            }
            if !spec.supports(Feature::Incremental) {
                errors.push(format!(
                    "Stream '{name}' uses incremental sync but connector '{}' does not support it",
                    spec.id
                ));
            }
        }
        SyncMode::Cdc => {
            if !spec.supports(Feature::Cdc) {
                errors.push(format!(
                    "Stream '{name}' uses cdc but connector '{}' does not support it",
                    spec.id
                ));
            }
        }
        SyncMode::FullRefresh => {}
    }

    if stream.sync_mode.is_cursored() && stream.destination_sync_mode == DestinationSyncMode::Overwrite
    {
        errors.push(format!(
            "Stream '{name}' cannot combine {} with overwrite; use append or append_dedup",
            stream.sync_mode
        ));
    }

    if stream.destination_sync_mode == DestinationSyncMode::AppendDedup
        && stream.primary_key.is_empty()
    {
        errors.push(format!(
            "Stream '{name}' uses append_dedup but has no primary_key"
        ));
    }
    if stream.primary_key.iter().any(|k| k.trim().is_empty()) {
        errors.push(format!("Stream '{name}' has an empty primary_key column"));
    }
}

/// Collect problems with a full stream list, including duplicate names.
pub fn check_streams(spec: &ConnectorSpec, streams: &[StreamConfig], errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for stream in streams {
        if !seen.insert(stream.name.as_str()) {
            errors.push(format!("Duplicate stream name '{}'", stream.name));
        }
        check_stream(spec, stream, errors);
    }
}

/// Validate a connection's full configuration.
///
/// # Errors
///
/// Returns [`SyncError::Validation`] listing every problem found.
pub fn validate_connection(
    registry: &ConnectorRegistry,
    name: &str,
    connector_kind: &str,
    destination: &str,
    streams: &[StreamConfig],
) -> Result<(), SyncError> {
    let mut errors = Vec::new();

    if name.trim().is_empty() {
        errors.push("Connection name must not be empty".to_string());
    }
    if destination.trim().is_empty() {
        errors.push("Destination reference must not be empty".to_string());
    }

    match registry.spec(connector_kind) {
        Some(spec) => check_streams(spec, streams, &mut errors),
        None => errors.push(format!("Unknown connector kind '{connector_kind}'")),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SyncError::Validation(errors))
    }
}

/// Validate a connection creation request.
///
/// # Errors
///
/// Returns [`SyncError::Validation`] listing every problem found.
pub fn validate_new_connection(
    registry: &ConnectorRegistry,
    new: &NewConnection,
) -> Result<(), SyncError> {
    validate_connection(
        registry,
        &new.name,
        &new.connector_kind,
        &new.destination,
        &new.streams,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::state::StreamName;
    use conduit_types::wire::{AuthType, SchemaChangePolicy};
    use proptest::prelude::*;
    use rstest::rstest;

    fn spec(features: Vec<Feature>) -> ConnectorSpec {
        ConnectorSpec {
            id: "src".into(),
            display_name: "Source".into(),
            auth_type: AuthType::None,
            features,
            max_concurrent_streams: 4,
        }
    }

    fn stream(
        name: &str,
        sync_mode: SyncMode,
        destination_sync_mode: DestinationSyncMode,
        cursor_field: Option<&str>,
        primary_key: &[&str],
    ) -> StreamConfig {
        StreamConfig {
            name: StreamName::new(name),
            sync_mode,
            destination_sync_mode,
            cursor_field: cursor_field.map(str::to_string),
            primary_key: primary_key.iter().map(|s| (*s).to_string()).collect(),
            enabled: true,
            on_schema_change: SchemaChangePolicy::Propagate,
        }
    }

    fn errors_for(spec: &ConnectorSpec, streams: &[StreamConfig]) -> Vec<String> {
        let mut errors = Vec::new();
        check_streams(spec, streams, &mut errors);
        errors
    }

    #[test]
    fn valid_streams_pass() {
        let s = spec(vec![Feature::Incremental]);
        let streams = vec![
            stream("a", SyncMode::FullRefresh, DestinationSyncMode::Overwrite, None, &[]),
            stream(
                "b",
                SyncMode::Incremental,
                DestinationSyncMode::AppendDedup,
                Some("updated_at"),
                &["id"],
            ),
            stream("c", SyncMode::FullRefresh, DestinationSyncMode::Append, None, &[]),
        ];
        assert!(errors_for(&s, &streams).is_empty());
    }

    #[rstest]
    #[case::incremental_without_cursor(
        stream("s", SyncMode::Incremental, DestinationSyncMode::Append, None, &[]),
        "no cursor_field"
    )]
    #[case::blank_cursor(
        stream("s", SyncMode::Incremental, DestinationSyncMode::Append, Some(" "), &[]),
        "no cursor_field"
    )]
    #[case::dedup_without_pk(
        stream("s", SyncMode::FullRefresh, DestinationSyncMode::AppendDedup, None, &[]),
        "no primary_key"
    )]
    #[case::incremental_overwrite(
        stream("s", SyncMode::Incremental, DestinationSyncMode::Overwrite, Some("id"), &[]),
        "cannot combine incremental with overwrite"
    )]
    #[case::cdc_unsupported(
        stream("s", SyncMode::Cdc, DestinationSyncMode::Append, None, &[]),
        "uses cdc but connector 'src' does not support it"
    )]
    #[case::empty_name(
        stream("", SyncMode::FullRefresh, DestinationSyncMode::Append, None, &[]),
        "Stream name must not be empty"
    )]
    fn invalid_stream_is_reported(#[case] bad: StreamConfig, #[case] expected: &str) {
        let errors = errors_for(&spec(vec![Feature::Incremental]), &[bad]);
        assert!(
            errors.iter().any(|e| e.contains(expected)),
            "expected '{expected}' in {errors:?}"
        );
    }

    #[test]
    fn incremental_requires_capability() {
        let errors = errors_for(
            &spec(vec![]),
            &[stream("s", SyncMode::Incremental, DestinationSyncMode::Append, Some("id"), &[])],
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("does not support it"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let s = spec(vec![]);
        let dup = stream("users", SyncMode::FullRefresh, DestinationSyncMode::Append, None, &[]);
        let errors = errors_for(&s, &[dup.clone(), dup]);
        assert_eq!(errors, vec!["Duplicate stream name 'users'".to_string()]);
    }

    #[test]
    fn all_errors_collected_together() {
        let registry = ConnectorRegistry::new();
        let err = validate_connection(&registry, "", "nope", "", &[]).unwrap_err();
        let SyncError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("Unknown connector kind 'nope'")));
    }

    fn arb_stream() -> impl Strategy<Value = StreamConfig> {
        (
            prop_oneof![
                Just(SyncMode::FullRefresh),
                Just(SyncMode::Incremental),
                Just(SyncMode::Cdc)
            ],
            prop_oneof![
                Just(DestinationSyncMode::Overwrite),
                Just(DestinationSyncMode::Append),
                Just(DestinationSyncMode::AppendDedup)
            ],
            proptest::option::of("[a-z]{1,8}"),
            proptest::collection::vec("[a-z]{1,8}", 0..3),
        )
            .prop_map(|(sync_mode, dest_mode, cursor, pk)| StreamConfig {
                name: StreamName::new("s"),
                sync_mode,
                destination_sync_mode: dest_mode,
                cursor_field: cursor,
                primary_key: pk,
                enabled: true,
                on_schema_change: SchemaChangePolicy::Propagate,
            })
    }

    proptest! {
        #[test]
        fn accepted_streams_satisfy_invariants(s in arb_stream()) {
            let spec = spec(vec![Feature::Incremental, Feature::Cdc]);
            let mut errors = Vec::new();
            check_stream(&spec, &s, &mut errors);
            if errors.is_empty() {
                if s.sync_mode == SyncMode::Incremental {
                    prop_assert!(s.cursor_field.is_some());
                }
                if s.destination_sync_mode == DestinationSyncMode::AppendDedup {
                    prop_assert!(!s.primary_key.is_empty());
                }
                prop_assert!(
                    !(s.sync_mode.is_cursored()
                        && s.destination_sync_mode == DestinationSyncMode::Overwrite)
                );
            }
        }
    }
}
