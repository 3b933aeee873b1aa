pub mod apply;
pub mod connections;
pub mod connectors;
pub mod reset;
pub mod runs;
pub mod schedule;
pub mod serve;
pub mod sync;

use conduit_types::run::SyncRun;

pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Print a run with one line per stream.
pub(crate) fn print_run(run: &SyncRun) {
    println!(
        "Run {} [{}] {}: {} records, {}",
        run.id,
        run.trigger,
        run.status,
        run.records_synced,
        format_bytes(run.bytes_synced)
    );
    if let (Some(started), Some(completed)) = (run.started_at, run.completed_at) {
        let secs = (completed - started).num_milliseconds() as f64 / 1000.0;
        println!("  Duration: {secs:.2}s");
    }
    if let Some(error) = &run.error {
        println!("  Error: {error}");
    }
    for stream in &run.streams {
        print!(
            "  {:24} {:10} {:>8} records  attempts {}",
            stream.name.as_str(),
            stream.status.to_string(),
            stream.records,
            stream.attempts
        );
        if let Some(cursor) = &stream.cursor_after {
            print!("  cursor {cursor}");
        }
        println!();
        if let Some(error) = &stream.error {
            println!("    {error}");
        }
    }
}
