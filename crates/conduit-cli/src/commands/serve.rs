use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;

/// Execute the `serve` command: recover abandoned runs, then run the API and
/// the scheduler until Ctrl-C.
pub async fn execute(engine: Engine) -> Result<()> {
    let recovered = engine
        .coordinator
        .recover_stale_runs(chrono::Utc::now())
        .await
        .context("Failed to recover stale runs")?;
    if recovered > 0 {
        tracing::warn!(recovered, "Recovered runs abandoned by a previous instance");
    }

    let addr: SocketAddr = engine
        .config
        .api
        .listen
        .parse()
        .with_context(|| format!("Invalid API listen address '{}'", engine.config.api.listen))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        signal.cancel();
    });

    let scheduler = if engine.config.scheduler.enabled {
        let scheduler = std::sync::Arc::clone(&engine.scheduler);
        let token = shutdown.clone();
        Some(tokio::spawn(async move { scheduler.run(token).await }))
    } else {
        tracing::info!("Scheduler disabled");
        None
    };

    let served = conduit_api::serve(addr, engine.api_state(), shutdown.clone()).await;
    shutdown.cancel();
    if let Some(handle) = scheduler {
        handle.await.context("Scheduler task panicked")?;
    }
    served
}
