//! Cycle scheduling, notification drain, and ordered shutdown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use snag_protocol::Posting;

use crate::capabilities::{Notifier, RecordSink};
use crate::claim::{ClaimQueueHandle, QueueStats};
use crate::discovery::{DiscoveryReport, ResourceDiscoverer, SeenSet};
use crate::error::Result;
use crate::protect::{self, BreakerRegistry, RetryPolicy, TracingObserver};
use crate::session::SessionAuthority;

const NOTIFIER_BREAKER: &str = "notifier";

/// Outcome of one coordinated cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub discovery: DiscoveryReport,
}

/// Drives discovery cycles on a schedule, wires discoverer output into the
/// claim and notification pipelines, and owns graceful shutdown.
pub struct Coordinator {
    sessions: Arc<SessionAuthority>,
    discoverer: ResourceDiscoverer,
    seen: Arc<SeenSet>,
    interval: Duration,
    cycle_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    claim_handle: Mutex<Option<ClaimQueueHandle>>,
    notifier_handle: Mutex<Option<JoinHandle<()>>>,
    queue_stats: Arc<QueueStats>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionAuthority>,
        discoverer: ResourceDiscoverer,
        seen: Arc<SeenSet>,
        claim_handle: ClaimQueueHandle,
        notify_rx: mpsc::Receiver<Posting>,
        notifier: Arc<dyn Notifier>,
        records: Arc<dyn RecordSink>,
        registry: Arc<BreakerRegistry>,
        notify_retry: RetryPolicy,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let notifier_handle = spawn_notifier(
            notify_rx,
            notifier,
            records,
            registry,
            notify_retry,
            shutdown_rx,
        );
        let queue_stats = Arc::clone(&claim_handle.stats);
        Self {
            sessions,
            discoverer,
            seen,
            interval,
            cycle_lock: tokio::sync::Mutex::new(()),
            shutdown: shutdown_tx,
            claim_handle: Mutex::new(Some(claim_handle)),
            notifier_handle: Mutex::new(Some(notifier_handle)),
            queue_stats,
        }
    }

    /// Claim-queue counters, for status reporting.
    pub fn queue_stats(&self) -> &Arc<QueueStats> {
        &self.queue_stats
    }

    /// Runs the fixed schedule until shutdown. A failed cycle is logged and
    /// retried on the next tick; nothing here terminates the process.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    match self.run_cycle().await {
                        Ok(report) => info!(
                            target = "snag.coordinator",
                            new_items = report.discovery.new_items,
                            candidates = report.discovery.candidates,
                            "cycle finished"
                        ),
                        Err(err) => warn!(
                            target = "snag.coordinator",
                            error = %err,
                            "cycle skipped"
                        ),
                    }
                }
            }
        }
        info!(target = "snag.coordinator", "scheduler stopped");
    }

    /// Runs one cycle synchronously: ensure a valid session, then discover.
    /// Also the operator-facing manual trigger. Cycles are serialized, so a
    /// manual trigger never overlaps a scheduled one.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _cycle = self.cycle_lock.lock().await;

        // Refuse to run unauthenticated rather than proceed.
        self.sessions.context().await?;

        match self.discoverer.discover().await {
            Ok(discovery) => Ok(CycleReport { discovery }),
            Err(err) => {
                if err.is_auth_invalid() {
                    // Next cycle re-establishes from scratch.
                    self.sessions.invalidate().await;
                }
                Err(err)
            }
        }
    }

    /// Ordered teardown: stop schedule triggers, let claim and notification
    /// workers finish in-flight work, release the session context, then
    /// flush discovery state. Nothing is torn down while something upstream
    /// can still produce work for it.
    pub async fn shutdown(&self) {
        info!(target = "snag.coordinator", "shutdown requested");
        let _ = self.shutdown.send(true);

        let claim = self.claim_handle.lock().take();
        if let Some(handle) = claim {
            handle.shutdown().await;
        }

        let notifier = self.notifier_handle.lock().take();
        if let Some(handle) = notifier {
            let _ = handle.await;
        }

        self.sessions.teardown().await;

        if let Err(err) = self.seen.flush() {
            warn!(target = "snag.coordinator", error = %err, "failed to flush seen-set");
        }
        info!(target = "snag.coordinator", "shutdown complete");
    }
}

/// Drains the notification pipe: persist the discovered item, then publish
/// with bounded retry behind the notifier's circuit.
fn spawn_notifier(
    mut rx: mpsc::Receiver<Posting>,
    notifier: Arc<dyn Notifier>,
    records: Arc<dyn RecordSink>,
    registry: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let posting = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                posting = rx.recv() => match posting {
                    Some(posting) => posting,
                    None => break,
                },
            };

            if let Err(err) = records.persist_posting(&posting).await {
                warn!(
                    target = "snag.coordinator",
                    posting_id = %posting.id,
                    error = %err,
                    "failed to persist discovered item"
                );
            }

            let breaker = registry.breaker(NOTIFIER_BREAKER);
            let outcome = protect::guarded(
                &breaker,
                &retry,
                &TracingObserver,
                "publish-notification",
                || notifier.publish(&posting),
            )
            .await;
            if let Err(err) = outcome {
                warn!(
                    target = "snag.coordinator",
                    posting_id = %posting.id,
                    error = %err,
                    "failed to publish notification"
                );
            }
        }
    })
}
