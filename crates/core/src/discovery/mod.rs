//! Catalog discovery: pagination sweep, exactly-once dedup, and enqueue.

/// Pagination sweep and enqueue of newly discovered items.
pub mod discoverer;
/// Identifier set with a rolling retention horizon.
pub mod seen;

pub use discoverer::{DiscoveryConfig, DiscoveryReport, ResourceDiscoverer};
pub use seen::SeenSet;
