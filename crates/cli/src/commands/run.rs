//! The scheduled discovery-to-claim loop.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::SnagConfig;
use crate::wiring;

/// Runs the coordinator's schedule until interrupted, then shuts down in
/// order.
pub async fn run(config: SnagConfig) -> Result<()> {
    let app = wiring::build(&config)?;

    let coordinator = Arc::clone(&app.coordinator);
    let schedule = tokio::spawn(async move {
        coordinator.run().await;
    });

    info!(
        target = "snag",
        interval_secs = config.schedule.cycle_interval_secs,
        location = %config.catalog.location,
        "running; press Ctrl+C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!(target = "snag", "interrupt received");

    app.shutdown().await;
    let _ = schedule.await;
    Ok(())
}
