//! Seen-set: the dedup store behind exactly-once discovery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::record::now_ts;

/// Identifier set with a rolling retention horizon.
///
/// The batch check-and-insert runs under a single lock, so two concurrent
/// discovery cycles can never both treat the same identifier as new. An
/// identifier stays in the set for the full horizon and is never re-enqueued
/// while present.
pub struct SeenSet {
    /// id → unix expiry of its retention horizon.
    entries: Mutex<HashMap<String, u64>>,
    horizon: Duration,
    path: Option<PathBuf>,
}

impl SeenSet {
    pub fn new(horizon: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            horizon,
            path: None,
        }
    }

    /// Creates a set backed by a JSON snapshot file, loading any previous
    /// snapshot so dedup survives restarts. An unreadable snapshot starts
    /// empty rather than failing.
    pub fn with_snapshot(horizon: Duration, path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<HashMap<String, u64>>(&raw).ok())
            .unwrap_or_default();
        debug!(
            target = "snag.discovery",
            loaded = entries.len(),
            path = %path.display(),
            "loaded seen-set snapshot"
        );
        Self {
            entries: Mutex::new(entries),
            horizon,
            path: Some(path),
        }
    }

    /// Atomic batch: returns the candidates not currently present and
    /// inserts them with a renewed horizon. Entries past their horizon count
    /// as absent and are pruned in the same critical section.
    pub fn check_and_insert(&self, candidates: &[String]) -> Vec<String> {
        let now = now_ts();
        let expiry = now + self.horizon.as_secs();
        let mut entries = self.entries.lock();
        entries.retain(|_, horizon| *horizon > now);

        let mut fresh = Vec::new();
        for id in candidates {
            if entries.contains_key(id) {
                continue;
            }
            entries.insert(id.clone(), expiry);
            fresh.push(id.clone());
        }
        fresh
    }

    /// Whether `id` is currently within its retention horizon.
    pub fn contains(&self, id: &str) -> bool {
        let now = now_ts();
        self.entries
            .lock()
            .get(id)
            .is_some_and(|horizon| *horizon > now)
    }

    /// Live (unexpired) cardinality.
    pub fn len(&self) -> usize {
        let now = now_ts();
        self.entries
            .lock()
            .values()
            .filter(|horizon| **horizon > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the snapshot file, when one is configured. Best-effort: a
    /// failed write is logged, not fatal, since the in-memory set stays
    /// authoritative for this run.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.entries.lock().clone();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if let Err(err) = std::fs::write(path, serde_json::to_vec(&snapshot)?) {
            warn!(target = "snag.discovery", error = %err, "failed to write seen-set snapshot");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}-{i}")).collect()
    }

    #[test]
    fn present_identifiers_are_never_returned_again() {
        let seen = SeenSet::new(Duration::from_secs(3600));
        let batch = ids("job", 5);
        assert_eq!(seen.check_and_insert(&batch).len(), 5);
        assert_eq!(seen.check_and_insert(&batch).len(), 0);
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn expired_identifiers_behave_as_absent() {
        let seen = SeenSet::new(Duration::from_secs(0));
        let batch = ids("job", 3);
        assert_eq!(seen.check_and_insert(&batch).len(), 3);
        // Horizon of zero: everything is already past it.
        assert_eq!(seen.check_and_insert(&batch).len(), 3);
    }

    #[test]
    fn concurrent_batches_enqueue_the_union_exactly_once() {
        let seen = Arc::new(SeenSet::new(Duration::from_secs(3600)));
        let overlapping: Vec<Vec<String>> = (0..8).map(|_| ids("job", 200)).collect();

        let handles: Vec<_> = overlapping
            .into_iter()
            .map(|batch| {
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || seen.check_and_insert(&batch).len())
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 200);
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn snapshot_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let first = SeenSet::with_snapshot(Duration::from_secs(3600), path.clone());
        first.check_and_insert(&ids("job", 4));
        first.flush().unwrap();

        let second = SeenSet::with_snapshot(Duration::from_secs(3600), path);
        assert_eq!(second.len(), 4);
        assert!(second.contains("job-0"));
        assert_eq!(second.check_and_insert(&ids("job", 4)).len(), 0);
    }
}
