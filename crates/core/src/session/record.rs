//! Persisted session record.

use serde::{Deserialize, Serialize};

use snag_protocol::{AuthTokens, Cookie, TokenSet};

use super::identity::Identity;

/// Tokens and cookies captured from a completed login flow, before the
/// identity is pinned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionArtifacts {
    pub tokens: TokenSet,
    pub cookies: Vec<Cookie>,
}

/// The authenticated session as persisted (encrypted) between runs.
///
/// Exclusively owned by the session authority; superseded whenever a full
/// re-authentication succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub tokens: TokenSet,
    pub cookies: Vec<Cookie>,
    /// Fingerprint the session was obtained with; reused on restore.
    pub identity: Identity,
}

impl SessionRecord {
    pub fn new(artifacts: SessionArtifacts, identity: Identity) -> Self {
        Self {
            tokens: artifacts.tokens,
            cookies: artifacts.cookies,
            identity,
        }
    }

    /// Whether the access token has expired at `now` (unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        self.tokens.is_expired(now)
    }

    /// The token pair exposed to pipeline callers.
    pub fn auth_tokens(&self) -> AuthTokens {
        AuthTokens {
            access_token: self.tokens.access_token.clone(),
            id_token: self.tokens.id_token.clone(),
        }
    }
}

/// Current unix time in seconds.
pub(crate) fn now_ts() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::identity::IdentityPool;

    fn record(expires_at: u64) -> SessionRecord {
        SessionRecord::new(
            SessionArtifacts {
                tokens: TokenSet {
                    access_token: "access".into(),
                    refresh_token: "refresh".into(),
                    id_token: "id".into(),
                    expires_at,
                },
                cookies: Vec::new(),
            },
            IdentityPool::default().select().clone(),
        )
    }

    #[test]
    fn expiry_uses_the_access_token_horizon() {
        let rec = record(1_000);
        assert!(rec.is_expired(1_000));
        assert!(rec.is_expired(2_000));
        assert!(!rec.is_expired(999));
    }

    #[test]
    fn auth_tokens_exposes_access_and_id_only() {
        let rec = record(u64::MAX);
        let tokens = rec.auth_tokens();
        assert_eq!(tokens.access_token, "access");
        assert_eq!(tokens.id_token, "id");
    }
}
