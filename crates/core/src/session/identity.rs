//! Fingerprint profiles used when opening automation contexts.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Viewport dimensions for a fingerprint profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A fingerprint profile: selected once per full authentication and
/// immutable for that session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
}

/// The configured pool identities are drawn from.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    profiles: Vec<Identity>,
}

impl IdentityPool {
    /// Builds a pool; falls back to the built-in profiles when `profiles`
    /// is empty.
    pub fn new(profiles: Vec<Identity>) -> Self {
        if profiles.is_empty() {
            return Self::default();
        }
        Self { profiles }
    }

    /// Picks a profile at random.
    pub fn select(&self) -> &Identity {
        self.profiles
            .choose(&mut rand::thread_rng())
            .expect("pool is never empty")
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        let profiles = vec![
            Identity {
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
                    .into(),
                viewport: Viewport {
                    width: 1920,
                    height: 1080,
                },
                locale: "en-US".into(),
                timezone: "America/New_York".into(),
            },
            Identity {
                user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                             AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 \
                             Safari/537.36"
                    .into(),
                viewport: Viewport {
                    width: 1440,
                    height: 900,
                },
                locale: "en-US".into(),
                timezone: "America/Chicago".into(),
            },
            Identity {
                user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36"
                    .into(),
                viewport: Viewport {
                    width: 1366,
                    height: 768,
                },
                locale: "en-US".into(),
                timezone: "America/Los_Angeles".into(),
            },
        ];
        Self { profiles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_falls_back_to_builtin_profiles() {
        let pool = IdentityPool::new(Vec::new());
        assert!(pool.len() >= 3);
    }

    #[test]
    fn select_always_returns_a_pool_member() {
        let pool = IdentityPool::default();
        for _ in 0..20 {
            let picked = pool.select();
            assert!(!picked.user_agent.is_empty());
        }
    }
}
