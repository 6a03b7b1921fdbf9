//! Token shapes exchanged with the authentication flow.

use serde::{Deserialize, Serialize};

/// Access/identity token pair exposed to pipeline callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub id_token: String,
}

/// Full token set captured from a login or refresh exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    /// Unix expiry of the access token, seconds.
    pub expires_at: u64,
}

impl TokenSet {
    /// Whether the access token is expired at `now` (unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}
