//! Violation and rate counters on top of the shared [`CounterStore`]
//!
//! Keys:
//! - `rate:<space>:<actor>:<action>` counts creations per actor for the
//!   rate-limit path (window from the space's `RateLimit`)
//! - `violations:<space>:<actor>` is the per-actor violation tally

use crate::config::RateLimit;
use crate::error::Result;
use crate::provider::CounterStore;
use crate::types::ActionKind;
use std::sync::Arc;
use std::time::Duration;

pub struct ViolationCounter {
    store: Arc<dyn CounterStore>,
    tally_window: Duration,
}

pub fn rate_key(space_id: &str, actor_id: &str, action: ActionKind) -> String {
    format!("rate:{}:{}:{}", space_id, actor_id, action)
}

pub fn tally_key(space_id: &str, actor_id: &str) -> String {
    format!("violations:{}:{}", space_id, actor_id)
}

impl ViolationCounter {
    pub fn new(store: Arc<dyn CounterStore>, tally_window: Duration) -> Self {
        Self {
            store,
            tally_window,
        }
    }

    /// Count one more occurrence; true when the count now exceeds the threshold
    pub async fn exceeds_limit(
        &self,
        space_id: &str,
        actor_id: &str,
        action: ActionKind,
        limit: &RateLimit,
    ) -> Result<bool> {
        let count = self
            .store
            .increment_and_get(&rate_key(space_id, actor_id, action), limit.window())
            .await?;
        tracing::trace!(space = space_id, actor = actor_id, %action, count, "Rate counter bumped");
        Ok(count > limit.threshold)
    }

    /// Record a violation against an actor, returning the running tally
    pub async fn tally(&self, space_id: &str, actor_id: &str) -> Result<u64> {
        self.store
            .increment_and_get(&tally_key(space_id, actor_id), self.tally_window)
            .await
    }

    pub async fn current_tally(&self, space_id: &str, actor_id: &str) -> Result<u64> {
        self.store.get(&tally_key(space_id, actor_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryCounterStore;
    use crate::types::{ChangeKind, EntityKind};

    fn counter() -> ViolationCounter {
        ViolationCounter::new(Arc::new(MemoryCounterStore::new()), Duration::from_secs(3600))
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_and_window() {
        let counter = counter();
        let action = ActionKind::new(EntityKind::Invite, ChangeKind::Create);
        let limit = RateLimit {
            threshold: 2,
            window_secs: 60,
        };

        assert!(!counter.exceeds_limit("s1", "u1", action, &limit).await.unwrap());
        assert!(!counter.exceeds_limit("s1", "u1", action, &limit).await.unwrap());
        assert!(counter.exceeds_limit("s1", "u1", action, &limit).await.unwrap());
        // Other actors have their own window
        assert!(!counter.exceeds_limit("s1", "u2", action, &limit).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!counter.exceeds_limit("s1", "u1", action, &limit).await.unwrap());
    }

    #[tokio::test]
    async fn test_tally() {
        let counter = counter();
        assert_eq!(counter.current_tally("s1", "u1").await.unwrap(), 0);
        assert_eq!(counter.tally("s1", "u1").await.unwrap(), 1);
        assert_eq!(counter.tally("s1", "u1").await.unwrap(), 2);
        assert_eq!(counter.current_tally("s1", "u1").await.unwrap(), 2);
        assert_eq!(counter.current_tally("s2", "u1").await.unwrap(), 0);
    }

    #[test]
    fn test_keys() {
        let action = ActionKind::new(EntityKind::Webhook, ChangeKind::Create);
        assert_eq!(rate_key("s1", "u1", action), "rate:s1:u1:webhook_create");
        assert_eq!(tally_key("s1", "u1"), "violations:s1:u1");
    }
}
