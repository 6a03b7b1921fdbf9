//! Assembles the pipeline from operator configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use snag::capabilities::{ClaimAction, ContextProvider, Credentials, Notifier, RecordSink};
use snag::claim::{ClaimQueue, ClaimQueueConfig, IdempotencyLocks};
use snag::coordinator::Coordinator;
use snag::discovery::{DiscoveryConfig, ResourceDiscoverer, SeenSet};
use snag::protect::{BreakerConfig, BreakerRegistry, RetryPolicy, breaker};
use snag::secrets::SecretCache;
use snag::session::{IdentityPool, SessionAuthority, SessionStore};

use crate::collaborators::{
    DriverClaimAction, DriverGateway, HttpCatalog, HttpMailbox, HttpSolver, JsonlSink,
    LocalKeyService, LogNotifier, WebhookNotifier,
};
use crate::config::{SnagConfig, session_envelope_path};

const SECRET_TTL: Duration = Duration::from_secs(3600);
const SECRET_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const SEEN_HORIZON: Duration = Duration::from_secs(30 * 24 * 3600);
const CLAIM_CHANNEL_CAPACITY: usize = 1024;

/// A fully wired pipeline plus its background housekeeping tasks.
pub struct App {
    pub coordinator: Arc<Coordinator>,
    breaker_logger: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl App {
    /// Shuts the coordinator down and stops housekeeping.
    pub async fn shutdown(self) {
        self.coordinator.shutdown().await;
        self.breaker_logger.abort();
        self.sweeper.abort();
    }
}

/// Builds every component in dependency order and hands back the
/// coordinator. Must run inside a tokio runtime (workers are spawned here).
pub fn build(config: &SnagConfig) -> Result<App> {
    let state_dir = config.state_dir()?;
    let (registry, breaker_events) = BreakerRegistry::new(BreakerConfig::default());
    let breaker_logger = breaker::log_state_changes(breaker_events);
    let retry = RetryPolicy::default();

    // Secrets and session persistence.
    let keys = Arc::new(
        LocalKeyService::new(&state_dir.join("master.key")).context("master key")?,
    );
    let secrets = Arc::new(SecretCache::new(
        keys,
        Arc::clone(&registry),
        retry.clone(),
        SECRET_TTL,
    ));
    let sweeper = Arc::clone(&secrets).spawn_sweeper(SECRET_SWEEP_INTERVAL);

    // Session authority and its collaborators.
    let code_window = Duration::from_secs(config.session.code_window_secs);
    let gateway = Arc::new(
        DriverGateway::new(&config.session.driver_endpoint, code_window).context("driver")?,
    );
    let solver = Arc::new(
        HttpSolver::new(
            &config.solver.endpoint,
            config.solver.api_key.clone(),
            Duration::from_millis(config.solver.poll_ms),
        )
        .context("solver")?,
    );
    let mailbox = Arc::new(HttpMailbox::new(&config.mailbox.endpoint).context("mailbox")?);
    let credentials = Credentials {
        username: config.session.username.clone(),
        password: config.session.resolve_password()?,
    };
    let sessions = Arc::new(SessionAuthority::new(
        SessionStore::new(session_envelope_path(config)?, Arc::clone(&secrets)),
        gateway,
        solver,
        mailbox,
        credentials,
        IdentityPool::default(),
        Arc::clone(&registry),
        retry.clone(),
    ));

    // Discovery.
    let seen = Arc::new(SeenSet::with_snapshot(
        SEEN_HORIZON,
        state_dir.join("seen.json"),
    ));
    let catalog = Arc::new(HttpCatalog::new(&config.catalog.endpoint).context("catalog")?);
    let (claim_tx, claim_rx) = tokio::sync::mpsc::channel(CLAIM_CHANNEL_CAPACITY);
    let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(CLAIM_CHANNEL_CAPACITY);
    let discoverer = ResourceDiscoverer::new(
        catalog,
        Arc::clone(&seen),
        Arc::clone(&registry),
        retry.clone(),
        DiscoveryConfig {
            location: config.catalog.location.clone(),
            radius: config.catalog.radius,
            page_size: config.catalog.page_size,
            page_delay: config.page_delay(),
            max_pages: config.catalog.max_pages,
            ..DiscoveryConfig::default()
        },
        claim_tx.clone(),
        notify_tx,
    );

    // Claim processing.
    let records: Arc<dyn RecordSink> = Arc::new(JsonlSink::new(state_dir.join("records.jsonl")));
    let action: Arc<dyn ClaimAction> = Arc::new(DriverClaimAction::new());
    let claim_handle = ClaimQueue::spawn(
        claim_rx,
        claim_tx,
        Arc::clone(&sessions) as Arc<dyn ContextProvider>,
        action,
        Arc::clone(&records),
        Arc::new(IdempotencyLocks::new(config.lock_ttl())),
        ClaimQueueConfig {
            workers: config.claim.workers,
            concurrency: config.claim.concurrency,
            max_attempts: config.claim.max_attempts,
            ..ClaimQueueConfig::default()
        },
    );

    // Notifications.
    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url).context("webhook")?),
        None => Arc::new(LogNotifier),
    };

    let coordinator = Arc::new(Coordinator::new(
        sessions,
        discoverer,
        seen,
        claim_handle,
        notify_rx,
        notifier,
        records,
        registry,
        retry,
        config.cycle_interval(),
    ));

    Ok(App {
        coordinator,
        breaker_logger,
        sweeper,
    })
}
