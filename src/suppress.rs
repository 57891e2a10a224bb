//! Self-action suppression and restoration locks
//!
//! The engine marks every entity it is about to mutate so the echo
//! notification for its own change is recognized and dropped. A separate
//! per-entity lock keeps two remediations for the same target from running
//! at once; it is released by TTL, not by completion of the work it guards.

use crate::expiry::ExpiryMap;
use std::time::Duration;

type EntityKey = (String, String);

fn key(space_id: &str, target_id: &str) -> EntityKey {
    (space_id.to_string(), target_id.to_string())
}

/// Short-lived markers for mutations issued by the engine itself
pub struct SelfActionSuppressor {
    markers: ExpiryMap<EntityKey, ()>,
    ttl: Duration,
}

impl SelfActionSuppressor {
    pub fn new(ttl: Duration) -> Self {
        Self {
            markers: ExpiryMap::new(),
            ttl,
        }
    }

    /// Mark a target with the default TTL
    pub fn mark(&self, space_id: &str, target_id: &str) {
        self.mark_for(space_id, target_id, self.ttl);
    }

    /// Mark a target with an explicit TTL, for slower-settling flows
    pub fn mark_for(&self, space_id: &str, target_id: &str, ttl: Duration) {
        tracing::trace!(space = space_id, target = target_id, ?ttl, "Self-action marked");
        self.markers.insert(key(space_id, target_id), (), ttl);
    }

    pub fn is_self_action(&self, space_id: &str, target_id: &str) -> bool {
        self.markers.contains(&key(space_id, target_id))
    }

    pub fn sweep(&self) -> usize {
        self.markers.sweep()
    }

    pub fn clear(&self) {
        self.markers.clear();
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Restoration-in-progress flags keyed by (space, target)
pub struct RestorationLocks {
    held: ExpiryMap<EntityKey, ()>,
    hold_for: Duration,
}

impl RestorationLocks {
    pub fn new(hold_for: Duration) -> Self {
        Self {
            held: ExpiryMap::new(),
            hold_for,
        }
    }

    /// Take the lock; false when a remediation is already in flight
    pub fn try_acquire(&self, space_id: &str, target_id: &str) -> bool {
        self.held
            .insert_if_absent(key(space_id, target_id), (), self.hold_for)
    }

    pub fn is_held(&self, space_id: &str, target_id: &str) -> bool {
        self.held.contains(&key(space_id, target_id))
    }

    pub fn sweep(&self) -> usize {
        self.held.sweep()
    }

    pub fn clear(&self) {
        self.held.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_marker_expires_after_ttl() {
        let suppressor = SelfActionSuppressor::new(Duration::from_secs(10));
        suppressor.mark("s1", "r1");
        assert!(suppressor.is_self_action("s1", "r1"));
        assert!(!suppressor.is_self_action("s2", "r1"));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(suppressor.is_self_action("s1", "r1"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!suppressor.is_self_action("s1", "r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_marker_outlives_default() {
        let suppressor = SelfActionSuppressor::new(Duration::from_secs(10));
        suppressor.mark_for("s1", "c1", Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(suppressor.is_self_action("s1", "c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_released_by_ttl() {
        let locks = RestorationLocks::new(Duration::from_secs(15));
        assert!(locks.try_acquire("s1", "r1"));
        assert!(!locks.try_acquire("s1", "r1"));
        assert!(locks.try_acquire("s1", "r2"));
        assert!(locks.is_held("s1", "r1"));

        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(!locks.is_held("s1", "r1"));
        assert!(locks.try_acquire("s1", "r1"));
    }
}
