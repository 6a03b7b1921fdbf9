//! Bounded-concurrency consumer for claim tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capabilities::{ClaimAction, ContextProvider, RecordSink};
use crate::protect::RetryPolicy;

use super::lock::IdempotencyLocks;
use super::task::{ClaimTask, TaskStatus};

/// Worker-pool parameters.
#[derive(Debug, Clone)]
pub struct ClaimQueueConfig {
    /// Worker tasks consuming the queue.
    pub workers: usize,
    /// Cap on in-flight claim actions, independent of the worker count.
    pub concurrency: usize,
    /// Total attempts per task before it is exhausted.
    pub max_attempts: u32,
    /// Delay schedule for requeued attempts.
    pub retry: RetryPolicy,
}

impl Default for ClaimQueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            concurrency: 2,
            max_attempts: 3,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: std::time::Duration::from_secs(2),
                ..RetryPolicy::default()
            },
        }
    }
}

/// Running counters for one queue instance.
#[derive(Debug, Default)]
pub struct QueueStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    exhausted: AtomicUsize,
    terminal_failures: AtomicUsize,
}

impl QueueStats {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Failed attempts, including ones that will retry.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Lock-contention skips. Deliberately separate from failures.
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn exhausted(&self) -> usize {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Tasks that reached a terminal state: completed, skipped, exhausted,
    /// or permanently failed.
    pub fn settled(&self) -> usize {
        self.completed()
            + self.skipped()
            + self.exhausted()
            + self.terminal_failures.load(Ordering::SeqCst)
    }
}

/// Handle over the spawned worker pool.
pub struct ClaimQueueHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    pub stats: Arc<QueueStats>,
}

impl ClaimQueueHandle {
    /// Stops intake and waits for in-flight work to finish. Queued tasks
    /// that never started are dropped, not cancelled mid-flight.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Consumes claim tasks with idempotent locking and bounded concurrency.
pub struct ClaimQueue {
    sessions: Arc<dyn ContextProvider>,
    action: Arc<dyn ClaimAction>,
    records: Arc<dyn RecordSink>,
    locks: Arc<IdempotencyLocks>,
    semaphore: Arc<Semaphore>,
    requeue: mpsc::Sender<ClaimTask>,
    stats: Arc<QueueStats>,
    config: ClaimQueueConfig,
}

impl ClaimQueue {
    /// Spawns the worker pool over `rx`. `tx` must be a sender for the same
    /// channel; it carries requeued attempts.
    pub fn spawn(
        rx: mpsc::Receiver<ClaimTask>,
        tx: mpsc::Sender<ClaimTask>,
        sessions: Arc<dyn ContextProvider>,
        action: Arc<dyn ClaimAction>,
        records: Arc<dyn RecordSink>,
        locks: Arc<IdempotencyLocks>,
        config: ClaimQueueConfig,
    ) -> ClaimQueueHandle {
        let stats = Arc::new(QueueStats::default());
        let queue = Arc::new(Self {
            sessions,
            action,
            records,
            locks,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            requeue: tx,
            stats: Arc::clone(&stats),
            config: config.clone(),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let rx = Arc::clone(&rx);
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    loop {
                        let task = tokio::select! {
                            biased;
                            _ = shutdown.changed() => break,
                            task = async { rx.lock().await.recv().await } => match task {
                                Some(task) => task,
                                None => break,
                            },
                        };
                        queue.process(worker_id, task).await;
                    }
                    debug!(target = "snag.claim", worker_id, "worker stopped");
                })
            })
            .collect();

        ClaimQueueHandle {
            shutdown: shutdown_tx,
            workers,
            stats,
        }
    }

    async fn process(&self, worker_id: usize, task: ClaimTask) {
        let task_id = task.id().to_string();

        if !self.locks.try_acquire(&task_id) {
            // Another worker, in this run or a prior un-expired one, is or
            // was handling this identifier.
            debug!(
                target = "snag.claim",
                worker_id,
                task_id = %task_id,
                "lock contention; skipping"
            );
            self.stats.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let attempt = task.attempts + 1;
        self.report_status(
            &task_id,
            TaskStatus::InProgress,
            json!({ "attempt": attempt }),
        )
        .await;

        let outcome = {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .expect("claim semaphore is never closed");
            match self.sessions.context().await {
                Ok(context) => self.action.perform(&task, context.as_ref()).await,
                Err(err) => Err(err),
            }
        };

        match outcome {
            Ok(()) => {
                info!(
                    target = "snag.claim",
                    task_id = %task_id,
                    attempt,
                    title = %task.posting.title,
                    "claim submitted"
                );
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
                self.report_status(&task_id, TaskStatus::Completed, json!({ "attempt": attempt }))
                    .await;
            }
            Err(err) if err.is_permanent() => {
                warn!(
                    target = "snag.claim",
                    task_id = %task_id,
                    error = %err,
                    "claim failed permanently"
                );
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                self.stats.terminal_failures.fetch_add(1, Ordering::SeqCst);
                self.report_status(
                    &task_id,
                    TaskStatus::Failed,
                    json!({ "attempt": attempt, "terminal": true, "error": err.to_string() }),
                )
                .await;
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                if attempt < self.config.max_attempts {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        target = "snag.claim",
                        task_id = %task_id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "claim failed; scheduling retry"
                    );
                    self.report_status(
                        &task_id,
                        TaskStatus::Failed,
                        json!({ "attempt": attempt, "error": err.to_string() }),
                    )
                    .await;

                    let requeue = self.requeue.clone();
                    let retry_task = task.next_attempt();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = requeue.send(retry_task).await;
                    });
                } else {
                    warn!(
                        target = "snag.claim",
                        task_id = %task_id,
                        attempt,
                        error = %err,
                        "claim attempts exhausted"
                    );
                    self.stats.exhausted.fetch_add(1, Ordering::SeqCst);
                    self.report_status(
                        &task_id,
                        TaskStatus::Exhausted,
                        json!({ "attempt": attempt, "error": err.to_string() }),
                    )
                    .await;
                }
            }
        }
    }

    /// Status transitions go to an external collaborator; its failures are
    /// logged, never allowed to fail the claim itself.
    async fn report_status(&self, task_id: &str, status: TaskStatus, detail: serde_json::Value) {
        if let Err(err) = self.records.update_task_status(task_id, status, detail).await {
            warn!(
                target = "snag.claim",
                task_id = %task_id,
                status = %status,
                error = %err,
                "failed to report task status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use snag_protocol::Posting;

    use crate::capabilities::{
        AutomationContext, ChallengeSolver, Credentials, OneTimeCodeSource, SessionProbe,
    };
    use crate::error::{Result, SnagError};
    use crate::session::{SessionArtifacts, SessionRecord, TokenSet};

    struct StubContext;

    #[async_trait]
    impl AutomationContext for StubContext {
        async fn apply_session(&self, _record: &SessionRecord) -> Result<()> {
            Ok(())
        }
        async fn probe(&self) -> Result<SessionProbe> {
            Ok(SessionProbe::Active)
        }
        async fn refresh(&self, _record: &SessionRecord) -> Result<TokenSet> {
            Err(SnagError::Permanent("not supported".into()))
        }
        async fn login(
            &self,
            _credentials: &Credentials,
            _challenge: &dyn ChallengeSolver,
            _one_time_code: &dyn OneTimeCodeSource,
        ) -> Result<SessionArtifacts> {
            Err(SnagError::Permanent("not supported".into()))
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StubProvider;

    #[async_trait]
    impl ContextProvider for StubProvider {
        async fn context(&self) -> Result<Arc<dyn AutomationContext>> {
            Ok(Arc::new(StubContext))
        }
    }

    /// Scripted claim action: fails the first `failures` invocations per
    /// process, tracks peak overlap.
    struct ScriptedAction {
        calls: AtomicUsize,
        failures: usize,
        permanent: bool,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedAction {
        fn succeeding() -> Self {
            Self::failing(0, false)
        }

        fn failing(failures: usize, permanent: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                permanent,
                delay: Duration::from_millis(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::succeeding()
            }
        }
    }

    #[async_trait]
    impl ClaimAction for ScriptedAction {
        async fn perform(&self, _task: &ClaimTask, _context: &dyn AutomationContext) -> Result<()> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if call < self.failures {
                if self.permanent {
                    Err(SnagError::Upstream {
                        status: 410,
                        message: "posting gone".into(),
                        retry_after: None,
                    })
                } else {
                    Err(SnagError::transient("submit hiccup"))
                }
            } else {
                Ok(())
            }
        }
    }

    struct NullSink;

    #[async_trait]
    impl RecordSink for NullSink {
        async fn persist_posting(&self, _posting: &Posting) -> Result<()> {
            Ok(())
        }
        async fn update_task_status(
            &self,
            _task_id: &str,
            _status: TaskStatus,
            _detail: serde_json::Value,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn posting(id: &str) -> Posting {
        Posting {
            id: id.into(),
            title: "Warehouse Associate".into(),
            location: None,
            posted_date: None,
            closing_date: None,
            application_url: format!("https://catalog.example/apply/{id}"),
            requisition_id: None,
            schedule: None,
            compensation: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(30),
            max_delay: Duration::from_millis(100),
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    struct Rig {
        tx: mpsc::Sender<ClaimTask>,
        handle: ClaimQueueHandle,
        action: Arc<ScriptedAction>,
    }

    fn rig(action: ScriptedAction, lock_ttl: Duration, config: ClaimQueueConfig) -> Rig {
        let (tx, rx) = mpsc::channel(64);
        let action = Arc::new(action);
        let handle = ClaimQueue::spawn(
            rx,
            tx.clone(),
            Arc::new(StubProvider),
            Arc::clone(&action) as Arc<dyn ClaimAction>,
            Arc::new(NullSink),
            Arc::new(IdempotencyLocks::new(lock_ttl)),
            config,
        );
        Rig { tx, handle, action }
    }

    #[tokio::test]
    async fn duplicate_task_ids_run_the_action_once() {
        let rig = rig(
            ScriptedAction::slow(Duration::from_millis(20)),
            Duration::from_secs(60),
            ClaimQueueConfig {
                workers: 2,
                concurrency: 2,
                ..ClaimQueueConfig::default()
            },
        );

        rig.tx.send(ClaimTask::new(posting("T1"))).await.unwrap();
        rig.tx.send(ClaimTask::new(posting("T1"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(rig.action.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.handle.stats.completed(), 1);
        assert_eq!(rig.handle.stats.skipped(), 1);
        assert_eq!(rig.handle.stats.failed(), 0);
        rig.handle.shutdown().await;
    }

    #[tokio::test]
    async fn transient_failure_is_requeued_and_succeeds() {
        // Lock TTL below the retry delay, so the retried attempt can
        // re-acquire.
        let rig = rig(
            ScriptedAction::failing(1, false),
            Duration::from_millis(10),
            ClaimQueueConfig {
                workers: 1,
                concurrency: 1,
                max_attempts: 3,
                retry: fast_retry(),
            },
        );

        rig.tx.send(ClaimTask::new(posting("T1"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(rig.action.calls.load(Ordering::SeqCst), 2);
        assert_eq!(rig.handle.stats.completed(), 1);
        assert_eq!(rig.handle.stats.failed(), 1);
        rig.handle.shutdown().await;
    }

    #[tokio::test]
    async fn permanent_failure_is_not_requeued() {
        let rig = rig(
            ScriptedAction::failing(usize::MAX, true),
            Duration::from_millis(10),
            ClaimQueueConfig {
                workers: 1,
                concurrency: 1,
                max_attempts: 3,
                retry: fast_retry(),
            },
        );

        rig.tx.send(ClaimTask::new(posting("T1"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(rig.action.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.handle.stats.failed(), 1);
        assert_eq!(rig.handle.stats.exhausted(), 0);
        rig.handle.shutdown().await;
    }

    #[tokio::test]
    async fn attempts_exhaust_after_the_configured_maximum() {
        let rig = rig(
            ScriptedAction::failing(usize::MAX, false),
            Duration::from_millis(5),
            ClaimQueueConfig {
                workers: 1,
                concurrency: 1,
                max_attempts: 2,
                retry: fast_retry(),
            },
        );

        rig.tx.send(ClaimTask::new(posting("T1"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(rig.action.calls.load(Ordering::SeqCst), 2);
        assert_eq!(rig.handle.stats.exhausted(), 1);
        rig.handle.shutdown().await;
    }

    #[tokio::test]
    async fn claim_concurrency_is_bounded_independently_of_workers() {
        let rig = rig(
            ScriptedAction::slow(Duration::from_millis(40)),
            Duration::from_secs(60),
            ClaimQueueConfig {
                workers: 4,
                concurrency: 1,
                ..ClaimQueueConfig::default()
            },
        );

        for i in 0..4 {
            rig.tx
                .send(ClaimTask::new(posting(&format!("T{i}"))))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(rig.action.calls.load(Ordering::SeqCst), 4);
        assert_eq!(rig.action.peak.load(Ordering::SeqCst), 1);
        rig.handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_work_finish() {
        let rig = rig(
            ScriptedAction::slow(Duration::from_millis(80)),
            Duration::from_secs(60),
            ClaimQueueConfig {
                workers: 1,
                concurrency: 1,
                ..ClaimQueueConfig::default()
            },
        );

        rig.tx.send(ClaimTask::new(posting("T1"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        rig.handle.shutdown().await;

        assert_eq!(rig.action.calls.load(Ordering::SeqCst), 1);
    }
}
