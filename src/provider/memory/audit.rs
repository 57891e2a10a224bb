use crate::error::Result;
use crate::provider::AuditTrail;
use crate::types::{ActionKind, AuditAttribution};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory audit trail
///
/// Entries are appended per (space, action); a lookup returns the newest.
#[derive(Default)]
pub struct MemoryAuditTrail {
    entries: RwLock<HashMap<(String, String), Vec<AuditAttribution>>>,
}

impl MemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an audit entry
    pub async fn record(&self, space_id: &str, action: ActionKind, attribution: AuditAttribution) {
        let mut entries = self.entries.write().await;
        entries
            .entry((space_id.to_string(), action.to_string()))
            .or_default()
            .push(attribution);
    }

    /// Append an entry attributed to `executor_id` targeting `target_id`, stamped now
    pub async fn record_now(
        &self,
        space_id: &str,
        action: ActionKind,
        executor_id: &str,
        target_id: &str,
    ) {
        self.record(
            space_id,
            action,
            AuditAttribution {
                executor_id: executor_id.to_string(),
                reason: None,
                target_id: Some(target_id.to_string()),
                at: Utc::now(),
            },
        )
        .await;
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl AuditTrail for MemoryAuditTrail {
    async fn lookup(&self, space_id: &str, action: ActionKind) -> Result<Option<AuditAttribution>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(space_id.to_string(), action.to_string()))
            .and_then(|list| list.last().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, EntityKind};

    #[tokio::test]
    async fn test_lookup_returns_newest() {
        let audit = MemoryAuditTrail::new();
        let action = ActionKind::new(EntityKind::Role, ChangeKind::Delete);
        assert!(audit.lookup("s1", action).await.unwrap().is_none());

        audit.record_now("s1", action, "u1", "r1").await;
        audit.record_now("s1", action, "u2", "r2").await;

        let found = audit.lookup("s1", action).await.unwrap().unwrap();
        assert_eq!(found.executor_id, "u2");
        assert_eq!(found.target_id.as_deref(), Some("r2"));

        let other = ActionKind::new(EntityKind::Role, ChangeKind::Create);
        assert!(audit.lookup("s1", other).await.unwrap().is_none());
        assert!(audit.lookup("s2", action).await.unwrap().is_none());
    }
}
