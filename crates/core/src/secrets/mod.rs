//! Encrypted-at-rest storage: TTL-cached data keys and the envelope format.
//!
//! Plaintext key material only ever lives in memory, zeroized on drop. The
//! external key service is reached through the protection layer; the cache
//! exists so steady-state envelope reads cost no network call.

pub mod cache;
pub mod envelope;

pub use cache::SecretCache;
pub use envelope::{open, seal};
