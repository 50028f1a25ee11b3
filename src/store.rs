//! Keyed cache storage
//!
//! `CacheStore` maps opaque query keys to cached results plus metadata
//! (status, timestamp, last error). It is pure storage: it never calls
//! network code and never suspends. Fetching and deduplication live in
//! [`crate::executor::QueryExecutor`].
//!
//! Keys are caller-constructed strings (e.g. `"pet-42"`); the store only
//! compares them for equality or prefix match, it does no parsing.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

/// Status of a cache entry, as stored.
///
/// `Stale` is never stored directly; it is the effective status reported by
/// [`CacheEntry::status`] when a freshness TTL has elapsed on a Fresh entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// A producer is outstanding for this key.
    Pending,
    /// The last producer run succeeded; the value may be served directly.
    Fresh,
    /// A Fresh entry whose configured TTL has elapsed; treated as a miss.
    Stale,
    /// The last producer run failed; the next query re-runs the producer.
    Failed,
}

/// A single cached result with its metadata.
///
/// Entries are owned by the store; `get` hands out snapshots (the value
/// itself is shared via `Arc`, the metadata is copied).
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// Last known value. Retained across Failed and Pending transitions so
    /// consumers can keep showing stale data while an error or refetch is
    /// in progress.
    pub value: Option<Arc<V>>,
    status: EntryStatus,
    /// When the entry last changed status.
    pub last_updated: Instant,
    /// Message from the last failed producer run, if any.
    pub error: Option<String>,
}

// Manual impl: entry values are shared via `Arc`, so cloning a snapshot
// must not require `V: Clone`.
impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            status: self.status,
            last_updated: self.last_updated,
            error: self.error.clone(),
        }
    }
}

impl<V> CacheEntry<V> {
    /// Effective status given an optional freshness TTL.
    pub fn status(&self, fresh_ttl: Option<Duration>) -> EntryStatus {
        match (self.status, fresh_ttl) {
            (EntryStatus::Fresh, Some(ttl)) if self.last_updated.elapsed() > ttl => {
                EntryStatus::Stale
            }
            (status, _) => status,
        }
    }

    /// Whether the entry may be served without re-running the producer.
    pub fn is_fresh(&self, fresh_ttl: Option<Duration>) -> bool {
        self.status(fresh_ttl) == EntryStatus::Fresh
    }
}

/// In-memory keyed cache shared by every fetch handle in a session.
///
/// Created at session start and cleared on logout via [`CacheStore::clear_all`].
/// All operations are synchronous map manipulation; the lock is held only for
/// the duration of the map access.
pub struct CacheStore<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of the entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Write a Fresh entry, stamped now. Clears any prior error or pending
    /// state for the key.
    pub fn set(&self, key: &str, value: Arc<V>) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_owned(),
            CacheEntry {
                value: Some(value),
                status: EntryStatus::Fresh,
                last_updated: Instant::now(),
                error: None,
            },
        );
    }

    /// Write a Failed entry. The previous value, if any, is retained so UI
    /// can keep displaying it; the Failed status still forces a refetch on
    /// the next query.
    pub fn set_error(&self, key: &str, message: impl Into<String>) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let value = entries.get(key).and_then(|e| e.value.clone());
        entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                status: EntryStatus::Failed,
                last_updated: Instant::now(),
                error: Some(message.into()),
            },
        );
    }

    /// Mark `key` as Pending, superseding any prior entry. The previous
    /// value is retained for stale display while the producer runs.
    pub fn mark_pending(&self, key: &str) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let value = entries.get(key).and_then(|e| e.value.clone());
        entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                status: EntryStatus::Pending,
                last_updated: Instant::now(),
                error: None,
            },
        );
    }

    /// Remove the entry for `key`. The next query for it is a miss and
    /// re-runs the producer.
    pub fn invalidate(&self, key: &str) {
        debug!("invalidating cache entry: {}", key);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Remove every entry whose key starts with `prefix`. Used after
    /// mutations that touch a family of keys (e.g. `"pets-"`).
    pub fn invalidate_by_prefix(&self, prefix: &str) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        debug!(
            "invalidated {} cache entries with prefix: {}",
            before - entries.len(),
            prefix
        );
    }

    /// Remove every entry. Used on logout / session reset.
    pub fn clear_all(&self) {
        debug!("clearing all cache entries");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_is_fresh() {
        let store = CacheStore::new();
        store.set("pet-1", Arc::new(42u32));

        let entry = store.get("pet-1").unwrap();
        assert_eq!(entry.status(None), EntryStatus::Fresh);
        assert!(entry.is_fresh(None));
        assert_eq!(*entry.value.unwrap(), 42);
        assert!(entry.error.is_none());
    }

    #[test]
    fn missing_key_is_absent() {
        let store: CacheStore<u32> = CacheStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn set_error_retains_prior_value() {
        let store = CacheStore::new();
        store.set("pet-1", Arc::new(42u32));
        store.set_error("pet-1", "network error");

        let entry = store.get("pet-1").unwrap();
        assert_eq!(entry.status(None), EntryStatus::Failed);
        assert!(!entry.is_fresh(None));
        assert_eq!(*entry.value.unwrap(), 42);
        assert_eq!(entry.error.as_deref(), Some("network error"));
    }

    #[test]
    fn set_clears_prior_failure() {
        let store = CacheStore::new();
        store.set_error("pet-1", "network error");
        store.set("pet-1", Arc::new(7u32));

        let entry = store.get("pet-1").unwrap();
        assert!(entry.is_fresh(None));
        assert!(entry.error.is_none());
    }

    #[test]
    fn mark_pending_retains_value() {
        let store = CacheStore::new();
        store.set("pet-1", Arc::new(42u32));
        store.mark_pending("pet-1");

        let entry = store.get("pet-1").unwrap();
        assert_eq!(entry.status(None), EntryStatus::Pending);
        assert_eq!(*entry.value.unwrap(), 42);
    }

    #[test]
    fn invalidate_removes_entry() {
        let store = CacheStore::new();
        store.set("pet-1", Arc::new(1u32));
        store.invalidate("pet-1");
        assert!(store.get("pet-1").is_none());
    }

    #[test]
    fn invalidate_by_prefix_removes_matching_only() {
        let store = CacheStore::new();
        store.set("pets-0xabc", Arc::new(1u32));
        store.set("pets-0xdef", Arc::new(2u32));
        store.set("leaderboard-10", Arc::new(3u32));

        store.invalidate_by_prefix("pets-");

        assert!(store.get("pets-0xabc").is_none());
        assert!(store.get("pets-0xdef").is_none());
        assert!(store.get("leaderboard-10").is_some());
    }

    #[test]
    fn clear_all_empties_store() {
        let store = CacheStore::new();
        store.set("a", Arc::new(1u32));
        store.set("b", Arc::new(2u32));
        assert_eq!(store.len(), 2);

        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn fresh_entry_goes_stale_after_ttl() {
        let store = CacheStore::new();
        store.set("pet-1", Arc::new(1u32));

        let entry = store.get("pet-1").unwrap();
        assert_eq!(entry.status(Some(Duration::from_secs(300))), EntryStatus::Fresh);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(entry.status(Some(Duration::from_millis(1))), EntryStatus::Stale);
        assert!(!entry.is_fresh(Some(Duration::from_millis(1))));
        // No TTL configured: never stale.
        assert!(entry.is_fresh(None));
    }
}
