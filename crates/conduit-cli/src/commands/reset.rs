use anyhow::{bail, Result};
use conduit_types::state::StreamName;

use crate::engine::Engine;

/// Execute the `reset` command: clear cursors after explicit confirmation.
pub async fn execute(
    engine: &Engine,
    reference: &str,
    stream: Option<String>,
    confirmed: bool,
) -> Result<()> {
    let connection = engine.resolve_connection(reference).await?;
    if !confirmed {
        bail!(
            "Reset discards replication state of '{}'; rerun with --yes to confirm",
            connection.name
        );
    }
    let removed = engine
        .connections
        .reset(&connection.id, stream.map(StreamName::new))
        .await?;
    println!("Removed {removed} cursor(s) from '{}'.", connection.name);
    Ok(())
}
