//! snag-core
//!
//! The resilient discovery-to-claim pipeline. This crate centralizes the
//! session-lifecycle authority, catalog discovery with exactly-once dedup,
//! the idempotent claim queue, and the shared protection layer every
//! external call passes through.
//!
//! External collaborators (browser driving, challenge solving, one-time
//! codes, claim submission, record persistence, notifications, key
//! management) are consumed through the narrow traits in [`capabilities`];
//! implementations live outside this crate.

pub mod capabilities;
pub mod claim;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod protect;
pub mod secrets;
pub mod session;

pub use coordinator::{Coordinator, CycleReport};
pub use error::{Result, SnagError};
