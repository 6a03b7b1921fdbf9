//! Claim processing: idempotency locks and the bounded worker pool.

/// TTL-bounded exclusivity markers keyed by task identifier.
pub mod lock;
/// Worker pool consuming claim tasks.
pub mod queue;
/// Claim task unit and its status vocabulary.
pub mod task;

pub use lock::IdempotencyLocks;
pub use queue::{ClaimQueue, ClaimQueueConfig, ClaimQueueHandle, QueueStats};
pub use task::{ClaimTask, TaskStatus};
