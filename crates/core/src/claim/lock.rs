//! TTL-bounded idempotency locks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Exclusive, TTL-bounded markers keyed by task identifier.
///
/// Acquisition is an atomic set-if-absent. There is no explicit release:
/// TTL expiry is the only mechanism, so a task identifier cannot be
/// reprocessed until its marker ages out, even after completion.
pub struct IdempotencyLocks {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl IdempotencyLocks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Attempts to take the lock for `key`. Returns `false` when another
    /// holder's marker is still within its TTL; that outcome is a normal
    /// skip, not a failure.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(expires) if *expires > now => false,
            _ => {
                entries.insert(key.to_string(), now + self.ttl);
                true
            }
        }
    }

    /// Whether an unexpired marker exists for `key`.
    pub fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|expires| *expires > now)
    }

    /// Drops expired markers. Housekeeping only; acquisition is correct
    /// without it.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expires| *expires > now);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn exactly_one_of_racing_acquirers_wins() {
        let locks = Arc::new(IdempotencyLocks::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                std::thread::spawn(move || locks.try_acquire("T1"))
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn second_acquisition_fails_while_marker_is_live() {
        let locks = IdempotencyLocks::new(Duration::from_secs(60));
        assert!(locks.try_acquire("T1"));
        assert!(!locks.try_acquire("T1"));
        assert!(locks.is_held("T1"));
    }

    #[test]
    fn expiry_is_the_only_release() {
        let locks = IdempotencyLocks::new(Duration::from_millis(20));
        assert!(locks.try_acquire("T1"));
        assert!(!locks.try_acquire("T1"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(locks.try_acquire("T1"));
    }

    #[test]
    fn purge_drops_only_expired_markers() {
        let locks = IdempotencyLocks::new(Duration::from_millis(20));
        locks.try_acquire("old");
        std::thread::sleep(Duration::from_millis(30));
        locks.try_acquire("fresh");
        assert_eq!(locks.purge_expired(), 1);
        assert!(locks.is_held("fresh"));
    }
}
