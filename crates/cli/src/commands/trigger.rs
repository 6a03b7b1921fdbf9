//! One synchronous discovery cycle.

use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::config::SnagConfig;
use crate::wiring;

/// Longest we wait for enqueued claims to settle before tearing down.
const SETTLE_DEADLINE: Duration = Duration::from_secs(120);

/// Builds the pipeline, runs exactly one cycle, waits for the claims it
/// enqueued to settle, reports, and tears down.
pub async fn run(config: SnagConfig) -> Result<()> {
    let app = wiring::build(&config)?;

    let outcome = app.coordinator.run_cycle().await;
    match &outcome {
        Ok(report) => {
            if report.discovery.new_items > 0 {
                wait_for_settlement(&app, report.discovery.new_items).await;
            }
            let stats = app.coordinator.queue_stats();
            println!("Cycle complete.");
            println!("  Pages fetched:   {}", report.discovery.pages);
            println!("  Candidates:      {}", report.discovery.candidates);
            println!("  New items:       {}", report.discovery.new_items);
            println!("  Claims done:     {}", stats.completed());
            if stats.skipped() > 0 {
                println!("  Claims skipped:  {}", stats.skipped());
            }
            if stats.exhausted() > 0 {
                println!("  Claims exhausted: {}", stats.exhausted());
            }
            if report.discovery.drift > 0 {
                println!("  Schema drift:    {}", report.discovery.drift);
            }
        }
        Err(err) => eprintln!("Cycle failed: {err}"),
    }

    app.shutdown().await;
    outcome.map(|_| ()).map_err(Into::into)
}

async fn wait_for_settlement(app: &wiring::App, expected: usize) {
    let start = std::time::Instant::now();
    loop {
        if app.coordinator.queue_stats().settled() >= expected {
            return;
        }
        if start.elapsed() > SETTLE_DEADLINE {
            info!(
                target = "snag",
                settled = app.coordinator.queue_stats().settled(),
                expected,
                "claims still pending at deadline; shutting down anyway"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
