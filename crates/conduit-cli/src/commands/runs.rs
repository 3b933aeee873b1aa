use anyhow::Result;
use conduit_types::state::RunId;

use super::print_run;
use crate::engine::Engine;

/// Execute the `runs` command: newest runs of a connection first.
pub async fn execute(engine: &Engine, reference: &str, limit: u32) -> Result<()> {
    let connection = engine.resolve_connection(reference).await?;
    let runs = engine
        .coordinator
        .list_runs(&connection.id, limit.clamp(1, 100), None)
        .await?;
    if runs.is_empty() {
        println!("No runs recorded for '{}'.", connection.name);
    }
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

/// Execute the `cancel` command. The owning instance notices the request on
/// its next poll.
pub async fn cancel(engine: &Engine, run_id: i64) -> Result<()> {
    engine.coordinator.cancel(RunId::new(run_id)).await?;
    println!("Cancellation requested for run {run_id}.");
    Ok(())
}
