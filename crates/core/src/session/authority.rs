//! Session-lifecycle authority.
//!
//! Owns exactly one live automation context. Callers borrow the handle;
//! they never open competing authentication flows. The progression is
//! load → validate → refresh → full re-authentication, with
//! teardown-before-replace ordering whenever a new context supersedes an
//! old one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use snag_protocol::AuthTokens;

use crate::capabilities::{
    AutomationContext, BrowserGateway, ChallengeContext, ChallengeSolver, Credentials,
    OneTimeCodeSource, SessionProbe,
};
use crate::error::{Result, SnagError};
use crate::protect::{self, BreakerConfig, BreakerRegistry, CircuitBreaker, RetryPolicy, TracingObserver};

use super::identity::IdentityPool;
use super::record::{SessionRecord, now_ts};
use super::store::SessionStore;

const PROBE_BREAKER: &str = "auth-session";
const REFRESH_BREAKER: &str = "auth-refresh";
const SOLVER_BREAKER: &str = "challenge-solver";

struct Live {
    context: Arc<dyn AutomationContext>,
    record: SessionRecord,
}

/// Keeps a long-lived authenticated context usable across restarts and
/// expirations.
pub struct SessionAuthority {
    store: SessionStore,
    gateway: Arc<dyn BrowserGateway>,
    challenge: Arc<dyn ChallengeSolver>,
    one_time_code: Arc<dyn OneTimeCodeSource>,
    credentials: Credentials,
    pool: IdentityPool,
    registry: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    live: Mutex<Option<Live>>,
}

impl SessionAuthority {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SessionStore,
        gateway: Arc<dyn BrowserGateway>,
        challenge: Arc<dyn ChallengeSolver>,
        one_time_code: Arc<dyn OneTimeCodeSource>,
        credentials: Credentials,
        pool: IdentityPool,
        registry: Arc<BreakerRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        // The solver collaborator is slow by nature; its circuit gets its
        // own generous timeout rather than the shared default.
        registry.configure(
            SOLVER_BREAKER,
            BreakerConfig {
                call_timeout: Duration::from_secs(180),
                reset_timeout: Duration::from_secs(120),
                ..BreakerConfig::default()
            },
        );
        Self {
            store,
            gateway,
            challenge,
            one_time_code,
            credentials,
            pool,
            registry,
            retry,
            live: Mutex::new(None),
        }
    }

    /// Returns a usable authenticated handle, establishing or repairing the
    /// session first when necessary.
    pub async fn context(&self) -> Result<Arc<dyn AutomationContext>> {
        let mut live = self.live.lock().await;
        self.ensure(&mut live).await
    }

    /// Tokens from the current valid session; fails if none exists. Never
    /// triggers authentication.
    pub async fn auth_tokens(&self) -> Result<AuthTokens> {
        let live = self.live.lock().await;
        match live.as_ref() {
            Some(current) if !current.record.is_expired(now_ts()) => {
                Ok(current.record.auth_tokens())
            }
            _ => Err(SnagError::Session("no valid session".into())),
        }
    }

    /// Drops the live context so the next caller re-establishes from
    /// scratch. Used after an auth-invalid signal from downstream.
    pub async fn invalidate(&self) {
        let mut live = self.live.lock().await;
        if let Some(previous) = live.take() {
            warn!(target = "snag.session", "invalidating live session");
            if let Err(err) = previous.context.close().await {
                warn!(target = "snag.session", error = %err, "failed to close invalidated context");
            }
        }
    }

    /// Closes the live context, keeping the persisted record for the next
    /// run. Part of the ordered shutdown sequence.
    pub async fn teardown(&self) {
        let mut live = self.live.lock().await;
        if let Some(previous) = live.take() {
            debug!(target = "snag.session", "closing session context");
            if let Err(err) = previous.context.close().await {
                warn!(target = "snag.session", error = %err, "failed to close context during teardown");
            }
        }
    }

    async fn ensure(&self, live: &mut Option<Live>) -> Result<Arc<dyn AutomationContext>> {
        if let Some(current) = live.as_ref() {
            if !current.record.is_expired(now_ts()) {
                return Ok(Arc::clone(&current.context));
            }
        }

        // In-memory session expired: refresh on the existing context first.
        if let Some(current) = live.as_mut() {
            match self.refresh(current).await {
                Ok(()) => {
                    self.store.save(&current.record).await?;
                    info!(target = "snag.session", "session refreshed");
                    return Ok(Arc::clone(&current.context));
                }
                Err(err) => {
                    warn!(target = "snag.session", error = %err, "refresh failed; re-authenticating");
                    // Teardown before any replacement is opened.
                    if let Some(stale) = live.take() {
                        let _ = stale.context.close().await;
                    }
                }
            }
        }

        let persisted = match self.store.load().await {
            Ok(record) => record,
            Err(err @ SnagError::UnsupportedVersion(_)) => return Err(err),
            Err(err) => {
                warn!(target = "snag.session", error = %err, "persisted session unreadable");
                None
            }
        };

        match persisted {
            Some(record) if !record.is_expired(now_ts()) => {
                match self.restore_valid(record).await {
                    Ok(restored) => {
                        let handle = Arc::clone(&restored.context);
                        *live = Some(restored);
                        info!(target = "snag.session", "restored persisted session");
                        return Ok(handle);
                    }
                    Err(err) => {
                        warn!(target = "snag.session", error = %err, "persisted session rejected");
                    }
                }
            }
            Some(record) => match self.restore_expired(record).await {
                Ok(restored) => {
                    if let Err(err) = self.store.save(&restored.record).await {
                        let _ = restored.context.close().await;
                        return Err(err);
                    }
                    let handle = Arc::clone(&restored.context);
                    *live = Some(restored);
                    info!(target = "snag.session", "refreshed persisted session");
                    return Ok(handle);
                }
                Err(err) => {
                    warn!(target = "snag.session", error = %err, "persisted session refresh failed");
                }
            },
            None => debug!(target = "snag.session", "no persisted session"),
        }

        self.full_authenticate(live).await
    }

    /// Opens a context with the record's pinned identity and validates it
    /// against a protected endpoint.
    async fn restore_valid(&self, record: SessionRecord) -> Result<Live> {
        let context = self.gateway.open(&record.identity).await?;
        context.apply_session(&record).await?;

        let breaker = self.registry.breaker(PROBE_BREAKER);
        let probe = protect::guarded(
            &breaker,
            &self.retry,
            &TracingObserver,
            "probe-session",
            || context.probe(),
        )
        .await;

        match probe {
            Ok(SessionProbe::Active) => Ok(Live { context, record }),
            Ok(SessionProbe::LoginRedirect) | Ok(SessionProbe::Unauthorized) => {
                let _ = context.close().await;
                Err(SnagError::Session("persisted session is invalid".into()))
            }
            Err(err) => {
                let _ = context.close().await;
                Err(err)
            }
        }
    }

    /// Opens a context with the record's pinned identity and refreshes its
    /// expired tokens.
    async fn restore_expired(&self, record: SessionRecord) -> Result<Live> {
        let context = self.gateway.open(&record.identity).await?;
        context.apply_session(&record).await?;
        let mut live = Live { context, record };
        match self.refresh(&mut live).await {
            Ok(()) => Ok(live),
            Err(err) => {
                let _ = live.context.close().await;
                Err(err)
            }
        }
    }

    async fn refresh(&self, live: &mut Live) -> Result<()> {
        let breaker = self.registry.breaker(REFRESH_BREAKER);
        let context = &live.context;
        let record = &live.record;
        let tokens = protect::guarded(
            &breaker,
            &self.retry,
            &TracingObserver,
            "refresh-session",
            || context.refresh(record),
        )
        .await?;
        live.record.tokens = tokens;
        Ok(())
    }

    /// Tears down any previous context, then drives the full login flow
    /// with a freshly selected identity.
    async fn full_authenticate(&self, live: &mut Option<Live>) -> Result<Arc<dyn AutomationContext>> {
        if let Some(previous) = live.take() {
            if let Err(err) = previous.context.close().await {
                warn!(target = "snag.session", error = %err, "failed to close superseded context");
            }
        }

        let identity = self.pool.select().clone();
        info!(
            target = "snag.session",
            user_agent = %identity.user_agent,
            timezone = %identity.timezone,
            "starting full authentication"
        );

        let context = self
            .gateway
            .open(&identity)
            .await
            .map_err(|e| SnagError::Session(format!("failed to open automation context: {e}")))?;

        let solver = GuardedSolver {
            inner: Arc::clone(&self.challenge),
            breaker: self.registry.breaker(SOLVER_BREAKER),
            retry: self.retry.clone(),
        };

        let artifacts = match context
            .login(&self.credentials, &solver, self.one_time_code.as_ref())
            .await
        {
            Ok(artifacts) => artifacts,
            Err(err) => {
                let _ = context.close().await;
                return Err(SnagError::Session(format!("full authentication failed: {err}")));
            }
        };

        let record = SessionRecord::new(artifacts, identity);
        if let Err(err) = self.store.save(&record).await {
            let _ = context.close().await;
            return Err(err);
        }
        info!(
            target = "snag.session",
            expires_at = record.tokens.expires_at,
            cookies = record.cookies.len(),
            "session established"
        );

        let handle = Arc::clone(&context);
        *live = Some(Live { context, record });
        Ok(handle)
    }
}

#[async_trait]
impl crate::capabilities::ContextProvider for SessionAuthority {
    async fn context(&self) -> Result<Arc<dyn AutomationContext>> {
        SessionAuthority::context(self).await
    }
}

/// Challenge solver wrapped in its dedicated circuit and retry schedule.
struct GuardedSolver {
    inner: Arc<dyn ChallengeSolver>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

#[async_trait]
impl ChallengeSolver for GuardedSolver {
    async fn solve(&self, site: &ChallengeContext) -> Result<String> {
        protect::guarded(
            &self.breaker,
            &self.retry,
            &TracingObserver,
            "solve-challenge",
            || self.inner.solve(site),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use zeroize::Zeroizing;

    use crate::capabilities::{DataKey, KeyService, SessionProbe};
    use crate::secrets::SecretCache;
    use crate::session::Identity;
    use crate::session::record::SessionArtifacts;
    use snag_protocol::TokenSet;

    type EventLog = Arc<StdMutex<Vec<String>>>;

    struct FakeContext {
        id: usize,
        log: EventLog,
        probe: SessionProbe,
        refresh_ok: bool,
    }

    #[async_trait]
    impl AutomationContext for FakeContext {
        async fn apply_session(&self, _record: &SessionRecord) -> Result<()> {
            self.log.lock().unwrap().push(format!("apply:{}", self.id));
            Ok(())
        }

        async fn probe(&self) -> Result<SessionProbe> {
            self.log.lock().unwrap().push(format!("probe:{}", self.id));
            Ok(self.probe)
        }

        async fn refresh(&self, _record: &SessionRecord) -> Result<TokenSet> {
            self.log.lock().unwrap().push(format!("refresh:{}", self.id));
            if self.refresh_ok {
                Ok(fresh_tokens("refreshed"))
            } else {
                Err(SnagError::Upstream {
                    status: 401,
                    message: "refresh token revoked".into(),
                    retry_after: None,
                })
            }
        }

        async fn login(
            &self,
            _credentials: &Credentials,
            _challenge: &dyn ChallengeSolver,
            _one_time_code: &dyn OneTimeCodeSource,
        ) -> Result<SessionArtifacts> {
            self.log.lock().unwrap().push(format!("login:{}", self.id));
            Ok(SessionArtifacts {
                tokens: fresh_tokens("logged-in"),
                cookies: Vec::new(),
            })
        }

        async fn close(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("close:{}", self.id));
            Ok(())
        }
    }

    struct FakeGateway {
        log: EventLog,
        opened: AtomicUsize,
        probe: SessionProbe,
        refresh_ok: bool,
    }

    #[async_trait]
    impl BrowserGateway for FakeGateway {
        async fn open(&self, _identity: &Identity) -> Result<Arc<dyn AutomationContext>> {
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("open:{id}"));
            Ok(Arc::new(FakeContext {
                id,
                log: Arc::clone(&self.log),
                probe: self.probe,
                refresh_ok: self.refresh_ok,
            }))
        }
    }

    struct NoopSolver;

    #[async_trait]
    impl ChallengeSolver for NoopSolver {
        async fn solve(&self, _site: &ChallengeContext) -> Result<String> {
            Ok("token".into())
        }
    }

    struct NoopCodes;

    #[async_trait]
    impl OneTimeCodeSource for NoopCodes {
        async fn retrieve(&self, _window: Duration) -> Result<Option<String>> {
            Ok(Some("123456".into()))
        }
    }

    struct StaticKeys;

    #[async_trait]
    impl KeyService for StaticKeys {
        async fn generate_data_key(&self) -> Result<DataKey> {
            Ok(DataKey {
                plaintext: Zeroizing::new(vec![3u8; 32]),
                wrapped: b"static".to_vec(),
            })
        }

        async fn unwrap_key(&self, _wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
            Ok(Zeroizing::new(vec![3u8; 32]))
        }
    }

    fn fresh_tokens(tag: &str) -> TokenSet {
        TokenSet {
            access_token: format!("{tag}-access"),
            refresh_token: format!("{tag}-refresh"),
            id_token: format!("{tag}-id"),
            expires_at: now_ts() + 3600,
        }
    }

    fn expired_tokens() -> TokenSet {
        TokenSet {
            access_token: "stale-access".into(),
            refresh_token: "stale-refresh".into(),
            id_token: "stale-id".into(),
            expires_at: now_ts().saturating_sub(60),
        }
    }

    struct Harness {
        authority: SessionAuthority,
        log: EventLog,
        store_path: std::path::PathBuf,
        secrets: Arc<SecretCache>,
        _dir: tempfile::TempDir,
    }

    fn harness(probe: SessionProbe, refresh_ok: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("session.enc.json");
        let (registry, _rx) = BreakerRegistry::new(BreakerConfig::default());
        let secrets = Arc::new(SecretCache::new(
            Arc::new(StaticKeys),
            Arc::clone(&registry),
            RetryPolicy::default(),
            Duration::from_secs(3600),
        ));
        let log: EventLog = Arc::new(StdMutex::new(Vec::new()));
        let gateway = Arc::new(FakeGateway {
            log: Arc::clone(&log),
            opened: AtomicUsize::new(0),
            probe,
            refresh_ok,
        });
        let authority = SessionAuthority::new(
            SessionStore::new(store_path.clone(), Arc::clone(&secrets)),
            gateway,
            Arc::new(NoopSolver),
            Arc::new(NoopCodes),
            Credentials {
                username: "operator".into(),
                password: "hunter2".into(),
            },
            IdentityPool::default(),
            registry,
            RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        );
        Harness {
            authority,
            log,
            store_path,
            secrets,
            _dir: dir,
        }
    }

    async fn seed_record(h: &Harness, tokens: TokenSet) {
        let record = SessionRecord::new(
            SessionArtifacts {
                tokens,
                cookies: Vec::new(),
            },
            IdentityPool::default().select().clone(),
        );
        h.secrets
            .save_encrypted(&record, &h.store_path)
            .await
            .unwrap();
    }

    fn events(h: &Harness) -> Vec<String> {
        h.log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn cold_start_performs_full_authentication_and_persists() {
        let h = harness(SessionProbe::Active, true);
        h.authority.context().await.unwrap();

        assert!(events(&h).contains(&"login:0".to_string()));
        assert!(h.store_path.exists());

        // Second call reuses the live context: no second login.
        h.authority.context().await.unwrap();
        let logins = events(&h).iter().filter(|e| e.starts_with("login")).count();
        assert_eq!(logins, 1);
    }

    #[tokio::test]
    async fn valid_persisted_session_is_restored_without_login() {
        let h = harness(SessionProbe::Active, true);
        seed_record(&h, fresh_tokens("persisted")).await;

        h.authority.context().await.unwrap();
        let log = events(&h);
        assert!(log.contains(&"apply:0".to_string()));
        assert!(log.contains(&"probe:0".to_string()));
        assert!(!log.iter().any(|e| e.starts_with("login")));

        let tokens = h.authority.auth_tokens().await.unwrap();
        assert_eq!(tokens.access_token, "persisted-access");
    }

    #[tokio::test]
    async fn invalid_probe_falls_through_to_full_authentication() {
        let h = harness(SessionProbe::LoginRedirect, true);
        seed_record(&h, fresh_tokens("persisted")).await;

        h.authority.context().await.unwrap();
        let log = events(&h);

        // The rejected context is torn down before the replacement logs in.
        let close_idx = log.iter().position(|e| e == "close:0").unwrap();
        let login_idx = log.iter().position(|e| e == "login:1").unwrap();
        assert!(close_idx < login_idx);
    }

    #[tokio::test]
    async fn expired_persisted_session_refreshes_without_login() {
        let h = harness(SessionProbe::Active, true);
        seed_record(&h, expired_tokens()).await;

        h.authority.context().await.unwrap();
        let log = events(&h);
        assert!(log.contains(&"refresh:0".to_string()));
        assert!(!log.iter().any(|e| e.starts_with("login")));

        let tokens = h.authority.auth_tokens().await.unwrap();
        assert_eq!(tokens.access_token, "refreshed-access");
    }

    #[tokio::test]
    async fn failed_refresh_falls_through_to_full_authentication() {
        let h = harness(SessionProbe::Active, false);
        seed_record(&h, expired_tokens()).await;

        h.authority.context().await.unwrap();
        let log = events(&h);
        assert!(log.contains(&"refresh:0".to_string()));
        assert!(log.iter().any(|e| e.starts_with("login")));
    }

    #[tokio::test]
    async fn auth_tokens_fails_without_a_session_and_never_authenticates() {
        let h = harness(SessionProbe::Active, true);
        let outcome = h.authority.auth_tokens().await;
        assert!(matches!(outcome, Err(SnagError::Session(_))));
        assert!(events(&h).is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_flow_on_next_call() {
        let h = harness(SessionProbe::Active, true);
        h.authority.context().await.unwrap();
        h.authority.invalidate().await;
        h.authority.context().await.unwrap();

        let log = events(&h);
        assert!(log.contains(&"close:0".to_string()));
        // Restore probes the persisted record on a new context.
        assert!(log.contains(&"probe:1".to_string()) || log.contains(&"login:1".to_string()));
    }
}
