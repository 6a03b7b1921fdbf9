//! Shared protection layer: circuit breaking and retry/backoff.
//!
//! Every call that crosses the system boundary goes through here. The
//! composition rule is fixed: the dependency-specific breaker wraps the
//! whole logical operation, and the retry loop runs inside the breaker.
//! Transient failures first exhaust the retries of a single operation;
//! only sustained failure across many operations trips the breaker.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState, StateChange};
pub use retry::{RetryObserver, RetryPolicy, TracingObserver};

use std::future::Future;

use crate::error::Result;

/// Runs `op` under `breaker` with `policy`-driven retries inside it.
pub async fn guarded<T, F, Fut>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    observer: &dyn RetryObserver,
    operation: &str,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    breaker
        .execute(|| retry::retry(operation, policy, observer, op))
        .await
}
