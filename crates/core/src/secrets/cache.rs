//! Process-wide TTL cache in front of the external key service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use crate::capabilities::{DataKey, KeyService};
use crate::error::Result;
use crate::protect::{self, BreakerRegistry, RetryPolicy, TracingObserver};

const KEY_SERVICE_BREAKER: &str = "key-service";

struct CachedSecret {
    key: Zeroizing<Vec<u8>>,
    inserted_at: Instant,
}

/// TTL-cached unwrapping of wrapped data keys.
///
/// Entries are keyed by the wrapped (ciphertext) form. A hit within the TTL
/// avoids the key-service call; expired entries behave as misses and are
/// also reaped by the periodic sweep.
pub struct SecretCache {
    keys: Arc<dyn KeyService>,
    registry: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    ttl: Duration,
    entries: Mutex<HashMap<Vec<u8>, CachedSecret>>,
}

impl SecretCache {
    pub fn new(
        keys: Arc<dyn KeyService>,
        registry: Arc<BreakerRegistry>,
        retry: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            keys,
            registry,
            retry,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the plaintext for a wrapped data key, fetching through the
    /// protection layer on a miss.
    pub async fn unwrap_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if let Some(hit) = self.lookup(wrapped) {
            return Ok(hit);
        }

        let breaker = self.registry.breaker(KEY_SERVICE_BREAKER);
        let plaintext = protect::guarded(
            &breaker,
            &self.retry,
            &TracingObserver,
            "unwrap-data-key",
            || self.keys.unwrap_key(wrapped),
        )
        .await?;

        self.insert(wrapped.to_vec(), plaintext.clone());
        Ok(plaintext)
    }

    /// Issues a fresh data key through the protection layer and primes the
    /// cache with it, so the envelope just written reads back without a
    /// fetch.
    pub async fn generate_data_key(&self) -> Result<DataKey> {
        let breaker = self.registry.breaker(KEY_SERVICE_BREAKER);
        let data_key = protect::guarded(
            &breaker,
            &self.retry,
            &TracingObserver,
            "generate-data-key",
            || self.keys.generate_data_key(),
        )
        .await?;

        self.insert(data_key.wrapped.clone(), data_key.plaintext.clone());
        Ok(data_key)
    }

    fn lookup(&self, wrapped: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let entries = self.entries.lock();
        let entry = entries.get(wrapped)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.key.clone())
    }

    fn insert(&self, wrapped: Vec<u8>, key: Zeroizing<Vec<u8>>) {
        self.entries.lock().insert(
            wrapped,
            CachedSecret {
                key,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Evicts entries older than the TTL. Called by the sweeper; public for
    /// status commands and tests.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of live cache entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Spawns the background sweep, evicting stale entries every `interval`
    /// independent of access.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!(target = "snag.secrets", evicted, "swept secret cache");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::protect::BreakerConfig;

    struct CountingKeys {
        unwraps: AtomicU32,
    }

    #[async_trait]
    impl KeyService for CountingKeys {
        async fn generate_data_key(&self) -> Result<DataKey> {
            Ok(DataKey {
                plaintext: Zeroizing::new(vec![7u8; 32]),
                wrapped: b"wrapped-7".to_vec(),
            })
        }

        async fn unwrap_key(&self, _wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
            self.unwraps.fetch_add(1, Ordering::SeqCst);
            Ok(Zeroizing::new(vec![7u8; 32]))
        }
    }

    fn cache_with_ttl(ttl: Duration) -> (Arc<SecretCache>, Arc<CountingKeys>) {
        let keys = Arc::new(CountingKeys {
            unwraps: AtomicU32::new(0),
        });
        let (registry, _rx) = BreakerRegistry::new(BreakerConfig::default());
        let cache = Arc::new(SecretCache::new(
            keys.clone(),
            registry,
            RetryPolicy::default(),
            ttl,
        ));
        (cache, keys)
    }

    #[tokio::test]
    async fn second_request_within_ttl_skips_the_key_service() {
        let (cache, keys) = cache_with_ttl(Duration::from_secs(3600));
        cache.unwrap_key(b"wrapped").await.unwrap();
        cache.unwrap_key(b"wrapped").await.unwrap();
        assert_eq!(keys.unwraps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_after_ttl_expiry_fetches_again() {
        let (cache, keys) = cache_with_ttl(Duration::from_millis(20));
        cache.unwrap_key(b"wrapped").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.unwrap_key(b"wrapped").await.unwrap();
        assert_eq!(keys.unwraps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sweep_evicts_only_stale_entries() {
        let (cache, _keys) = cache_with_ttl(Duration::from_millis(25));
        cache.unwrap_key(b"old").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.unwrap_key(b"fresh").await.unwrap();

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn generated_key_primes_the_cache() {
        let (cache, keys) = cache_with_ttl(Duration::from_secs(3600));
        let data_key = cache.generate_data_key().await.unwrap();
        cache.unwrap_key(&data_key.wrapped).await.unwrap();
        assert_eq!(keys.unwraps.load(Ordering::SeqCst), 0);
    }
}
