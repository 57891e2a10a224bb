//! Whitelist authority
//!
//! Two layers decide whether an executor is exempt from remediation:
//!
//! - a synchronous check against the space's static `GuardConfig`
//!   (exempt users and roles), and
//! - an asynchronous check against the persisted [`WhitelistStore`],
//!   user first, then the action, then each held role.
//!
//! Every store sub-check is cached independently for the configured TTL.
//! Cached results are never invalidated on write, so a just-removed entry
//! can still be honored until its cache slot expires. Store failures count
//! as "not whitelisted" and are not cached.

use crate::config::GuardConfig;
use crate::expiry::ExpiryMap;
use crate::provider::WhitelistStore;
use crate::types::{ActionKind, WhitelistKind};
use std::sync::Arc;
use std::time::Duration;

type CacheKey = (WhitelistKind, String, String);

pub struct WhitelistAuthority {
    store: Arc<dyn WhitelistStore>,
    cache: ExpiryMap<CacheKey, bool>,
    ttl: Duration,
}

impl WhitelistAuthority {
    pub fn new(store: Arc<dyn WhitelistStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: ExpiryMap::new(),
            ttl,
        }
    }

    /// Static exemption: the executor or any role it holds is listed in config
    pub fn is_whitelisted(config: &GuardConfig, executor_id: &str, roles: &[String]) -> bool {
        config.whitelisted_users.iter().any(|u| u == executor_id)
            || roles
                .iter()
                .any(|r| config.whitelisted_roles.iter().any(|w| w == r))
    }

    /// Persisted exemption: user, then action, then each held role
    pub async fn check_whitelist(
        &self,
        space_id: &str,
        executor_id: &str,
        action: ActionKind,
        roles: &[String],
    ) -> bool {
        if self
            .check_one(space_id, WhitelistKind::User, executor_id)
            .await
        {
            return true;
        }
        if self
            .check_one(space_id, WhitelistKind::Action, &action.to_string())
            .await
        {
            return true;
        }
        for role in roles {
            if self.check_one(space_id, WhitelistKind::Role, role).await {
                return true;
            }
        }
        false
    }

    async fn check_one(&self, space_id: &str, kind: WhitelistKind, target_id: &str) -> bool {
        let key = (kind, space_id.to_string(), target_id.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }

        match self.store.is_active(space_id, kind, target_id).await {
            Ok(active) => {
                self.cache.insert(key, active, self.ttl);
                active
            }
            Err(e) => {
                tracing::warn!(
                    space = %space_id,
                    kind = kind.as_str(),
                    target = %target_id,
                    error = %e,
                    "Whitelist lookup failed, treating as not whitelisted"
                );
                false
            }
        }
    }

    /// Evict expired cache slots
    pub fn sweep(&self) -> usize {
        self.cache.sweep()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GuardError, Result};
    use crate::provider::memory::MemoryWhitelistStore;
    use crate::types::{ChangeKind, EntityKind, WhitelistEntry};
    use async_trait::async_trait;

    fn role_delete() -> ActionKind {
        ActionKind::new(EntityKind::Role, ChangeKind::Delete)
    }

    fn authority(store: Arc<MemoryWhitelistStore>) -> WhitelistAuthority {
        WhitelistAuthority::new(store, Duration::from_secs(30))
    }

    #[test]
    fn test_static_whitelist() {
        let config = GuardConfig {
            whitelisted_users: vec!["u1".to_string()],
            whitelisted_roles: vec!["r-admin".to_string()],
            ..GuardConfig::default()
        };
        assert!(WhitelistAuthority::is_whitelisted(&config, "u1", &[]));
        assert!(WhitelistAuthority::is_whitelisted(
            &config,
            "u2",
            &["r-x".to_string(), "r-admin".to_string()]
        ));
        assert!(!WhitelistAuthority::is_whitelisted(&config, "u2", &["r-x".to_string()]));
    }

    #[tokio::test]
    async fn test_user_action_and_role_matches() {
        let store = Arc::new(MemoryWhitelistStore::new());
        store
            .add(WhitelistEntry::new("s1", WhitelistKind::User, "u1", "owner"))
            .await
            .unwrap();
        store
            .add(WhitelistEntry::new("s1", WhitelistKind::Action, "role_delete", "owner"))
            .await
            .unwrap();
        store
            .add(WhitelistEntry::new("s2", WhitelistKind::Role, "r-trusted", "owner"))
            .await
            .unwrap();
        let auth = authority(store);

        assert!(auth.check_whitelist("s1", "u1", role_delete(), &[]).await);
        assert!(auth.check_whitelist("s1", "u9", role_delete(), &[]).await);

        let channel_delete = ActionKind::new(EntityKind::Channel, ChangeKind::Delete);
        assert!(!auth.check_whitelist("s2", "u9", channel_delete, &[]).await);
        assert!(
            auth.check_whitelist("s2", "u9", channel_delete, &["r-trusted".to_string()])
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_serves_stale_until_ttl() {
        let store = Arc::new(MemoryWhitelistStore::new());
        store
            .add(WhitelistEntry::new("s1", WhitelistKind::User, "u1", "owner"))
            .await
            .unwrap();
        let auth = authority(store.clone());
        assert!(auth.check_whitelist("s1", "u1", role_delete(), &[]).await);

        store.remove("s1", WhitelistKind::User, "u1").await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(auth.check_whitelist("s1", "u1", role_delete(), &[]).await);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!auth.check_whitelist("s1", "u1", role_delete(), &[]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_result_refreshes_after_ttl() {
        let store = Arc::new(MemoryWhitelistStore::new());
        let auth = authority(store.clone());
        assert!(!auth.check_whitelist("s1", "u1", role_delete(), &[]).await);

        store
            .add(WhitelistEntry::new("s1", WhitelistKind::User, "u1", "owner"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(auth.check_whitelist("s1", "u1", role_delete(), &[]).await);
    }

    struct BrokenStore;

    #[async_trait]
    impl WhitelistStore for BrokenStore {
        async fn add(&self, _entry: WhitelistEntry) -> Result<()> {
            Err(GuardError::Transient("down".to_string()))
        }

        async fn remove(&self, _: &str, _: WhitelistKind, _: &str) -> Result<bool> {
            Err(GuardError::Transient("down".to_string()))
        }

        async fn list(&self, _: &str) -> Result<Vec<WhitelistEntry>> {
            Err(GuardError::Transient("down".to_string()))
        }

        async fn is_active(&self, _: &str, _: WhitelistKind, _: &str) -> Result<bool> {
            Err(GuardError::Transient("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed_and_is_not_cached() {
        let auth = WhitelistAuthority::new(Arc::new(BrokenStore), Duration::from_secs(30));
        assert!(
            !auth
                .check_whitelist("s1", "u1", role_delete(), &["r1".to_string()])
                .await
        );
        assert_eq!(auth.cached(), 0);
    }
}
