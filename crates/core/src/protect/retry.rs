//! Exponential backoff with jitter and permanent-failure short-circuit.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{Result, SnagError};

/// Backoff schedule for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Jitter fraction applied to every delay (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Undithered backoff for the given attempt (1-indexed), clamped to
    /// `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }

    /// Backoff with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt).as_secs_f64();
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((backoff * (1.0 + spread)).max(0.0))
    }
}

/// Receives a report for every failed attempt.
pub trait RetryObserver: Send + Sync {
    fn attempt_failed(&self, operation: &str, attempt: u32, remaining: u32, error: &SnagError);
}

/// Default observer: structured warning per failed attempt.
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn attempt_failed(&self, operation: &str, attempt: u32, remaining: u32, error: &SnagError) {
        warn!(
            target = "snag.protect",
            %operation,
            attempt,
            remaining,
            error = %error,
            "attempt failed"
        );
    }
}

/// Retries `op` per `policy`.
///
/// Permanent failures abort without consuming further attempts. A
/// retry-after hint from the error replaces the computed backoff for that
/// wait.
pub async fn retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    observer: &dyn RetryObserver,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.is_permanent() {
            return Err(err);
        }

        let remaining = policy.max_attempts.saturating_sub(attempt);
        observer.attempt_failed(operation, attempt, remaining, &err);
        if remaining == 0 {
            return Err(err);
        }

        let delay = err.retry_after().unwrap_or_else(|| policy.delay_for(attempt));
        tokio::time::sleep(delay).await;
    }
}
