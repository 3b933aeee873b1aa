use anyhow::Result;

use crate::engine::Engine;

/// Execute the `connections` command: list connections with their status.
pub async fn execute(engine: &Engine) -> Result<()> {
    let connections = engine.connections.list().await?;
    if connections.is_empty() {
        println!("No connections configured.");
        return Ok(());
    }
    for connection in connections {
        let drift = if connection.schema_change { "  [schema changed]" } else { "" };
        println!(
            "  {}  {:24} {:8} {} -> {}  ({} streams){drift}",
            connection.id,
            connection.name,
            connection.status.as_str(),
            connection.connector_kind,
            connection.destination,
            connection.streams.len()
        );
        if let Some(error) = &connection.error_message {
            println!("    {error}");
        }
    }
    Ok(())
}
