//! Error taxonomy for the pipeline.
//!
//! The protection layer keys its behavior off this classification:
//! transient conditions are retried, permanent ones abort immediately, and
//! circuit rejections surface without invoking the wrapped call. Lock
//! contention is deliberately not represented here; it is a normal outcome,
//! not an error.

use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SnagError>;

#[derive(Debug, thiserror::Error)]
pub enum SnagError {
    /// Network failure, 5xx, or timeout. Retried by the protection layer.
    #[error("transient failure: {message}")]
    Transient {
        message: String,
        /// Upstream-provided wait hint (e.g. a 429 Retry-After).
        retry_after: Option<Duration>,
    },

    /// HTTP-like status from an upstream dependency. 4xx other than 429 is
    /// treated as permanent; everything else retries.
    #[error("upstream returned {status}: {message}")]
    Upstream {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Explicitly-marked permanent failure. Never retried.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Short-circuit rejection; the wrapped call was never invoked.
    #[error("circuit '{name}' is open")]
    CircuitOpen { name: String },

    /// No valid authenticated context could be obtained.
    #[error("session error: {0}")]
    Session(String),

    /// Persisted envelope carries a version this build cannot read.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),

    /// Encryption, decryption, or key-material failure. Fails closed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SnagError {
    /// Convenience constructor for transient conditions without a hint.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether retrying this condition can never succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Permanent(_) | Self::Session(_) | Self::UnsupportedVersion(_) => true,
            Self::Upstream { status, .. } => (400..500).contains(status) && *status != 429,
            Self::Crypto(_) | Self::Json(_) => true,
            Self::Transient { .. } | Self::CircuitOpen { .. } | Self::Io(_) => false,
        }
    }

    /// Upstream wait hint, when one was provided.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } | Self::Upstream { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// Whether this condition signals a revoked or invalid session.
    pub fn is_auth_invalid(&self) -> bool {
        matches!(self, Self::Session(_) | Self::Upstream { status: 401 | 403, .. })
    }
}
