use anyhow::{bail, Result};
use conduit_types::run::{RunStatus, TriggerMode};

use super::print_run;
use crate::engine::Engine;

/// Execute the `sync` command: trigger a manual run and, unless detached,
/// wait for it. Ctrl-C cancels the run.
pub async fn execute(engine: &Engine, reference: &str, detach: bool) -> Result<()> {
    let connection = engine.resolve_connection(reference).await?;
    let started = engine
        .coordinator
        .trigger(&connection.id, TriggerMode::Manual)
        .await?;
    println!("Started run {} for '{}'.", started.id, connection.name);
    if detach {
        return Ok(());
    }

    let run = tokio::select! {
        run = engine.coordinator.wait(started.id) => run?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(run_id = started.id.get(), "Cancelling run");
            engine.coordinator.cancel(started.id).await?;
            engine.coordinator.wait(started.id).await?
        }
    };

    print_run(&run);
    match run.status {
        RunStatus::Completed => Ok(()),
        status => bail!("Sync run {} finished {status}", run.id),
    }
}
