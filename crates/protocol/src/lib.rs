//! Wire types for the external contracts snag talks to.
//!
//! This crate contains the serde-serializable types used on the wire: the
//! catalog query contract, the persisted session-envelope file, and the
//! cookie/token shapes captured from the authenticated context.
//!
//! Types in this crate are pure data: no behavior beyond serialization and
//! the base64 helpers the envelope format needs. Higher-level logic lives in
//! `snag-core`.

pub mod catalog;
pub mod cookie;
pub mod envelope;
pub mod tokens;

pub use catalog::*;
pub use cookie::*;
pub use envelope::*;
pub use tokens::*;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Encodes bytes as standard base64, as used by the envelope file.
pub fn to_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes standard base64, as used by the envelope file.
pub fn from_b64(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(s)
}
