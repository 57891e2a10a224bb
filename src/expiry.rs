//! TTL-bearing in-memory map
//!
//! Backs every short-lived piece of engine state: self-action markers,
//! restoration locks, the whitelist cache and the restored-id memory.
//! Entries are checked lazily on access and evicted in bulk by
//! [`ExpiryMap::sweep`]. Deadlines use `tokio::time::Instant`, so a paused
//! runtime clock drives expiry in tests.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct Slot<V> {
    value: V,
    deadline: Instant,
}

/// Map whose entries disappear after a per-entry TTL
pub struct ExpiryMap<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for ExpiryMap<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> ExpiryMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an entry, resetting its TTL
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        self.lock().insert(key, Slot { value, deadline });
    }

    /// Insert only when no live entry exists; returns true if inserted
    pub fn insert_if_absent(&self, key: K, value: V, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(slot) = entries.get(&key) {
            if slot.deadline > now {
                return false;
            }
        }
        entries.insert(
            key,
            Slot {
                value,
                deadline: now + ttl,
            },
        );
        true
    }

    /// Update a live entry in place keeping its deadline, or insert a
    /// fresh one with `ttl`; returns the stored value
    pub fn upsert<F>(&self, key: K, ttl: Duration, update: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let now = Instant::now();
        let mut entries = self.lock();
        let deadline = match entries.get(&key) {
            Some(slot) if slot.deadline > now => slot.deadline,
            _ => now + ttl,
        };
        let previous = entries
            .get(&key)
            .filter(|slot| slot.deadline > now)
            .map(|slot| &slot.value);
        let value = update(previous);
        entries.insert(
            key,
            Slot {
                value: value.clone(),
                deadline,
            },
        );
        value
    }

    /// Get a live entry, evicting it if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(slot) if slot.deadline > now => Some(slot.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key).map(|slot| slot.value)
    }

    /// Evict every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, slot| slot.deadline > now);
        before - entries.len()
    }

    /// Drop everything, expired or not
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_lazily() {
        let map = ExpiryMap::new();
        map.insert("a", 1, Duration::from_secs(10));
        assert_eq!(map.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(map.get(&"a"), None);
        assert!(map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_if_absent_respects_live_entry() {
        let map = ExpiryMap::new();
        assert!(map.insert_if_absent("lock", (), Duration::from_secs(5)));
        assert!(!map.insert_if_absent("lock", (), Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(map.insert_if_absent("lock", (), Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let map = ExpiryMap::new();
        map.insert(1, "short", Duration::from_secs(1));
        map.insert(2, "long", Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(map.len(), 2);
        assert_eq!(map.sweep(), 1);
        assert_eq!(map.len(), 1);
        assert!(map.contains(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinsert_resets_ttl() {
        let map = ExpiryMap::new();
        map.insert("k", 1, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        map.insert("k", 2, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(map.get(&"k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_preserves_deadline() {
        let map = ExpiryMap::new();
        let incr = |v: Option<&u64>| v.copied().unwrap_or(0) + 1;
        assert_eq!(map.upsert("k", Duration::from_secs(10), incr), 1);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(map.upsert("k", Duration::from_secs(10), incr), 2);

        // Deadline was set by the first insert, not the increment
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(map.get(&"k"), None);
        assert_eq!(map.upsert("k", Duration::from_secs(10), incr), 1);
    }

    #[test]
    fn test_clear() {
        let map = ExpiryMap::new();
        map.insert("a", 1, Duration::from_secs(60));
        map.insert("b", 2, Duration::from_secs(60));
        map.clear();
        assert!(map.is_empty());
    }
}
