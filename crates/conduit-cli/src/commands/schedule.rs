use anyhow::Result;
use conduit_types::schedule::Schedule;

use crate::engine::Engine;

/// Execute the `schedule` command: show the schedule, or replace it when a
/// cron expression is given.
pub async fn execute(
    engine: &Engine,
    reference: &str,
    cron: Option<&str>,
    timezone: &str,
    enabled: bool,
) -> Result<()> {
    let connection = engine.resolve_connection(reference).await?;
    let schedule = match cron {
        Some(cron) => {
            engine
                .scheduler
                .put_schedule(&connection.id, cron, timezone, enabled, chrono::Utc::now())
                .await?
        }
        None => engine.scheduler.get_schedule(&connection.id).await?,
    };
    print_schedule(&connection.name, &schedule);
    Ok(())
}

fn print_schedule(name: &str, schedule: &Schedule) {
    println!(
        "Schedule for '{name}': {} ({}){}",
        schedule.cron,
        schedule.timezone,
        if schedule.is_enabled { "" } else { " [disabled]" }
    );
    match schedule.next_run_at {
        Some(next) => println!("  Next run: {}", next.to_rfc3339()),
        None => println!("  Next run: none"),
    }
}
