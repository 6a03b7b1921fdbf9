//! Per-dependency circuit breakers with an explicit registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Result, SnagError};

/// Thresholds and timeouts for one breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures required to trip the breaker.
    pub failure_threshold: u32,
    /// Minimum calls observed before the breaker may trip.
    pub volume_threshold: u32,
    /// Time the breaker stays open before allowing a trial call.
    pub reset_timeout: Duration,
    /// Hard timeout raced against every admitted call.
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            volume_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Breaker state machine positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

/// State-transition event published for logging/metrics subscribers.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    calls: u32,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    open_until: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            calls: 0,
            failures: 0,
            successes: 0,
            last_failure: None,
            open_until: None,
            trial_in_flight: false,
        }
    }

    fn reset_counters(&mut self) {
        self.calls = 0;
        self.failures = 0;
        self.successes = 0;
    }
}

/// Failure-isolation state machine for one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    events: mpsc::UnboundedSender<StateChange>,
}

impl CircuitBreaker {
    fn new(name: String, config: BreakerConfig, events: mpsc::UnboundedSender<StateChange>) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner::new()),
            events,
        }
    }

    /// Dependency name this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, for status reporting.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Runs `call` under the breaker: rejects immediately while open, races
    /// the call against the hard timeout, and counts the outcome. A timeout
    /// is a failure.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;

        match tokio::time::timeout(self.config.call_timeout, call()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(err)
            }
            Err(_) => {
                self.record_failure();
                Err(SnagError::transient(format!(
                    "'{}' call exceeded {:?}",
                    self.name, self.config.call_timeout
                )))
            }
        }
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.calls += 1;
                Ok(())
            }
            CircuitState::Open => {
                let elapsed = inner.open_until.is_none_or(|until| Instant::now() >= until);
                if !elapsed {
                    return Err(SnagError::CircuitOpen {
                        name: self.name.clone(),
                    });
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(SnagError::CircuitOpen {
                        name: self.name.clone(),
                    });
                }
                inner.trial_in_flight = true;
                Ok(())
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.reset_counters();
                inner.open_until = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
            _ => inner.successes += 1,
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.open_until = Some(Instant::now() + self.config.reset_timeout);
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold
                    && inner.calls >= self.config.volume_threshold
                {
                    inner.open_until = Some(Instant::now() + self.config.reset_timeout);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        debug!(
            target = "snag.protect",
            breaker = %self.name,
            %from,
            %to,
            "circuit state change"
        );
        let _ = self.events.send(StateChange {
            name: self.name.clone(),
            from,
            to,
        });
    }
}

/// Explicit registry mapping dependency names to breakers.
///
/// Constructed once and passed by reference to every component that wraps
/// external calls; breakers are created lazily on first use and live for the
/// process lifetime.
pub struct BreakerRegistry {
    default: BreakerConfig,
    configs: RwLock<HashMap<String, BreakerConfig>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    events: mpsc::UnboundedSender<StateChange>,
}

impl BreakerRegistry {
    /// Creates a registry and the receiving end of its state-change channel.
    pub fn new(default: BreakerConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<StateChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            default,
            configs: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            events: tx,
        });
        (registry, rx)
    }

    /// Pre-registers a per-dependency config, overriding the default for
    /// breakers not yet created.
    pub fn configure(&self, name: impl Into<String>, config: BreakerConfig) {
        self.configs.write().insert(name.into(), config);
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return Arc::clone(existing);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            let config = self
                .configs
                .read()
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.default.clone());
            Arc::new(CircuitBreaker::new(name.to_string(), config, self.events.clone()))
        }))
    }
}

/// Drains breaker state changes into the log. Metrics subscribers can take
/// the receiver instead and fan out themselves.
pub fn log_state_changes(
    mut rx: mpsc::UnboundedReceiver<StateChange>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            info!(
                target = "snag.protect",
                breaker = %change.name,
                from = %change.from,
                to = %change.to,
                "circuit transitioned"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            volume_threshold: 5,
            reset_timeout: Duration::from_millis(50),
            call_timeout: Duration::from_millis(200),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .execute(|| async { Err::<(), _>(SnagError::transient("boom")) })
            .await
    }

    #[tokio::test]
    async fn trips_open_after_threshold_and_rejects_without_invoking() {
        let (registry, _rx) = BreakerRegistry::new(fast_config());
        let breaker = registry.breaker("catalog-api");

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let outcome = breaker
            .execute(|| async {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(outcome, Err(SnagError::CircuitOpen { .. })));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn half_open_trial_success_closes_and_resets() {
        let (registry, _rx) = BreakerRegistry::new(fast_config());
        let breaker = registry.breaker("catalog-api");

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        breaker.execute(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // Counters were reset: a single failure must not re-trip.
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_trial_failure_reopens() {
        let (registry, _rx) = BreakerRegistry::new(fast_config());
        let breaker = registry.breaker("flaky");

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let config = BreakerConfig {
            call_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let (registry, _rx) = BreakerRegistry::new(config);
        let breaker = registry.breaker("slow");

        let outcome: Result<()> = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(outcome, Err(SnagError::Transient { .. })));
    }

    #[tokio::test]
    async fn below_volume_threshold_does_not_trip() {
        let config = BreakerConfig {
            failure_threshold: 2,
            volume_threshold: 10,
            ..fast_config()
        };
        let (registry, _rx) = BreakerRegistry::new(config);
        let breaker = registry.breaker("low-volume");

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let (registry, mut rx) = BreakerRegistry::new(fast_config());
        let breaker = registry.breaker("observed");

        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        let change = rx.recv().await.unwrap();
        assert_eq!(change.name, "observed");
        assert_eq!(change.from, CircuitState::Closed);
        assert_eq!(change.to, CircuitState::Open);
    }

    #[tokio::test]
    async fn registry_reuses_breaker_instances() {
        let (registry, _rx) = BreakerRegistry::new(fast_config());
        let a = registry.breaker("same");
        let b = registry.breaker("same");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
