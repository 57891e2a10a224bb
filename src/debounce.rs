//! Debounce/coalescer for duplicate change notifications
//!
//! Each fingerprint holds at most one pending timer. A new arrival for the
//! same fingerprint aborts the pending timer and reschedules with the newer
//! action, so exactly one action fires per settled fingerprint and it always
//! carries the last observed state.

use crate::types::{ActionKind, ViolationType};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Identity of one logical change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint<'a> {
    pub space_id: &'a str,
    pub violation_type: ViolationType,
    pub target_id: &'a str,
    pub executor_id: &'a str,
    /// Stable digest of what changed (field names, not values)
    pub change_digest: String,
}

impl Fingerprint<'_> {
    pub fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Digest of an action plus the names of the fields it touched
pub fn change_digest(action: ActionKind, changed_fields: &[&str]) -> String {
    let mut fields: Vec<&str> = changed_fields.to_vec();
    fields.sort_unstable();
    format!("{}:{}", action, fields.join(","))
}

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

type PendingMap = HashMap<u64, Pending>;

/// Per-fingerprint trailing-edge debouncer
#[derive(Default)]
pub struct Debouncer {
    pending: Arc<Mutex<PendingMap>>,
    generation: AtomicU64,
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` after `delay`, replacing any pending action for
    /// the same fingerprint
    pub fn debounce<F>(&self, fingerprint: u64, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);

        // Hold the lock across spawn + insert so the timer can never observe
        // the map before its own entry is in place.
        let mut map = lock(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = lock(&pending);
                match map.get(&fingerprint) {
                    Some(p) if p.generation == generation => {
                        map.remove(&fingerprint);
                    }
                    _ => return,
                }
            }
            action.await;
        });

        if let Some(previous) = map.insert(fingerprint, Pending { generation, handle }) {
            previous.handle.abort();
            tracing::trace!(fingerprint, "Debounce timer reset");
        }
    }

    /// Number of fingerprints waiting to settle
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Cancel every pending action without running it
    pub fn flush(&self) -> usize {
        let drained: Vec<Pending> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        for p in &drained {
            p.handle.abort();
        }
        drained.len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, EntityKind};
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_single_fire_with_last_state() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(0));

        for i in 1..=5 {
            let fired = fired.clone();
            let last = last.clone();
            debouncer.debounce(42, Duration::from_secs(1), async move {
                fired.fetch_add(1, Ordering::SeqCst);
                *last.lock().unwrap() = i;
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(*last.lock().unwrap(), 5);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_fingerprints_fire_independently() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for fp in [1, 2, 3] {
            let fired = fired.clone();
            debouncer.debounce(fp, Duration::from_secs(1), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(debouncer.pending(), 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_cancels_pending() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        debouncer.debounce(7, Duration::from_secs(1), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(debouncer.flush(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_still_fires() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        debouncer.debounce(9, Duration::ZERO, async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fingerprint_ignores_field_order() {
        let action = ActionKind::new(EntityKind::Role, ChangeKind::Update);
        let a = change_digest(action, &["permissions", "name"]);
        let b = change_digest(action, &["name", "permissions"]);
        assert_eq!(a, b);
        assert_eq!(a, "role_update:name,permissions");

        let fp = |digest: String| Fingerprint {
            space_id: "s1",
            violation_type: ViolationType::RoleUpdateUnauthorized,
            target_id: "r1",
            executor_id: "u1",
            change_digest: digest,
        };
        assert_eq!(fp(a.clone()).hash_value(), fp(b).hash_value());
        assert_ne!(
            fp(a).hash_value(),
            fp(change_digest(action, &["color"])).hash_value()
        );
    }
}
