use anyhow::Result;

use crate::engine::Engine;

/// Execute the `connectors` command: list registered connector kinds.
pub fn execute(engine: &Engine) -> Result<()> {
    let specs = engine.coordinator.registry().list();
    if specs.is_empty() {
        println!("No connectors registered.");
        return Ok(());
    }
    for spec in specs {
        let features: Vec<String> = spec.features.iter().map(|f| format!("{f:?}")).collect();
        println!("  {} ({})", spec.id, spec.display_name);
        println!(
            "    auth: {:?}  features: [{}]  max concurrent streams: {}",
            spec.auth_type,
            features.join(", "),
            spec.max_concurrent_streams
        );
    }
    Ok(())
}
