mod commands;
mod engine;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "conduit",
    version,
    about = "Connector sync orchestration engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine config YAML (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the scheduler until interrupted
    Serve,
    /// List registered connector kinds
    Connectors,
    /// List configured connections
    Connections,
    /// Create or update connections and schedules from a manifest
    Apply {
        /// Path to connections YAML file
        manifest: PathBuf,
    },
    /// Trigger a manual sync
    Sync {
        /// Connection id or name
        connection: String,
        /// Return once the run has started instead of waiting for it
        #[arg(long)]
        detach: bool,
    },
    /// Show run history of a connection
    Runs {
        /// Connection id or name
        connection: String,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Request cancellation of a running sync
    Cancel {
        /// Run id
        run_id: i64,
    },
    /// Clear cursor state so the next sync starts over
    Reset {
        /// Connection id or name
        connection: String,
        /// Reset only this stream
        #[arg(long)]
        stream: Option<String>,
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Show or set a connection's schedule
    Schedule {
        /// Connection id or name
        connection: String,
        /// Cron expression; omit to show the current schedule
        #[arg(long)]
        cron: Option<String>,
        #[arg(long, default_value = "UTC")]
        timezone: String,
        /// Store the schedule disabled
        #[arg(long)]
        disable: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let config = engine::load_config(cli.config.as_deref())?;
    let engine = engine::Engine::build(config)?;

    match cli.command {
        Commands::Serve => commands::serve::execute(engine).await,
        Commands::Connectors => commands::connectors::execute(&engine),
        Commands::Connections => commands::connections::execute(&engine).await,
        Commands::Apply { manifest } => commands::apply::execute(&engine, &manifest).await,
        Commands::Sync { connection, detach } => {
            commands::sync::execute(&engine, &connection, detach).await
        }
        Commands::Runs { connection, limit } => {
            commands::runs::execute(&engine, &connection, limit).await
        }
        Commands::Cancel { run_id } => commands::runs::cancel(&engine, run_id).await,
        Commands::Reset {
            connection,
            stream,
            yes,
        } => commands::reset::execute(&engine, &connection, stream, yes).await,
        Commands::Schedule {
            connection,
            cron,
            timezone,
            disable,
        } => {
            commands::schedule::execute(&engine, &connection, cron.as_deref(), &timezone, !disable)
                .await
        }
    }
}
