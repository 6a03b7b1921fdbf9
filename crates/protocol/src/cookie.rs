//! Cookie shape captured from the authenticated context.

use serde::{Deserialize, Serialize};

/// A browser cookie as captured into (and restored from) a session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix expiry in seconds; absent or negative means a session cookie.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

impl Cookie {
    /// Whether the cookie is expired at `now` (unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires {
            Some(ts) if ts >= 0.0 => (ts as u64) < now,
            _ => false,
        }
    }
}
