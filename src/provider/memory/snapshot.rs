use crate::entity::{EntityState, Guardable};
use crate::error::Result;
use crate::provider::SnapshotStore;
use crate::types::{EntityKind, Snapshot, SnapshotInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory snapshot store
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a captured snapshot
    pub async fn insert(&self, snapshot: Snapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.id.clone(), snapshot);
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn latest(&self, space_id: &str) -> Result<Option<SnapshotInfo>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .values()
            .filter(|s| s.space_id == space_id)
            .max_by_key(|s| s.timestamp)
            .map(Snapshot::info))
    }

    async fn get(
        &self,
        snapshot_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<EntityState>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(snapshot_id)
            .and_then(|s| s.entities.get(&kind))
            .and_then(|by_id| by_id.get(entity_id))
            .cloned())
    }

    async fn recent(&self, space_id: &str, limit: usize) -> Result<Vec<SnapshotInfo>> {
        let snapshots = self.snapshots.read().await;
        let mut infos: Vec<SnapshotInfo> = snapshots
            .values()
            .filter(|s| s.space_id == space_id)
            .map(Snapshot::info)
            .collect();
        infos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        infos.truncate(limit);
        Ok(infos)
    }

    async fn members_holding_role(&self, snapshot_id: &str, role_id: &str) -> Result<Vec<String>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(snapshot_id)
            .and_then(|s| s.role_members.get(role_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn children_of(&self, snapshot_id: &str, parent_id: &str) -> Result<Vec<EntityState>> {
        let snapshots = self.snapshots.read().await;
        let Some(snapshot) = snapshots.get(snapshot_id) else {
            return Ok(Vec::new());
        };
        Ok(snapshot
            .entities
            .values()
            .flat_map(|by_id| by_id.values())
            .filter(|e| e.parent_ref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn entities(&self, snapshot_id: &str, kind: EntityKind) -> Result<Vec<EntityState>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(snapshot_id)
            .map(|s| s.entities_of(kind).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ChannelState, RoleState, WebhookState};
    use chrono::{Duration, Utc};

    fn snapshot(id: &str, age_mins: i64) -> Snapshot {
        Snapshot::new(id, "s1", Utc::now() - Duration::minutes(age_mins))
    }

    #[tokio::test]
    async fn test_latest_and_recent_ordering() {
        let store = MemorySnapshotStore::new();
        store.insert(snapshot("old", 30)).await;
        store.insert(snapshot("new", 1)).await;
        store.insert(snapshot("mid", 10)).await;
        store
            .insert(Snapshot::new("other-space", "s2", Utc::now()))
            .await;

        assert_eq!(store.latest("s1").await.unwrap().unwrap().id, "new");
        let recent: Vec<String> = store
            .recent("s1", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(recent, vec!["new", "mid"]);
        assert!(store.latest("s3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_is_kind_scoped() {
        let store = MemorySnapshotStore::new();
        store
            .insert(snapshot("snap", 0).with_entity(EntityState::Role(RoleState::new("r1", "Mods"))))
            .await;

        assert!(store.get("snap", EntityKind::Role, "r1").await.unwrap().is_some());
        assert!(store.get("snap", EntityKind::Channel, "r1").await.unwrap().is_none());
        assert!(store.get("missing", EntityKind::Role, "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_children_and_members() {
        let store = MemorySnapshotStore::new();
        store
            .insert(
                snapshot("snap", 0)
                    .with_entity(EntityState::Channel(ChannelState::category("p1", "Info")))
                    .with_entity(EntityState::Channel(ChannelState::text("c1", "rules").under("p1")))
                    .with_entity(EntityState::Channel(ChannelState::text("c2", "news").under("p1")))
                    .with_entity(EntityState::Webhook(WebhookState::new("w1", "feed", "c1")))
                    .with_role_members("r1", ["u1", "u2"]),
            )
            .await;

        let mut children: Vec<String> = store
            .children_of("snap", "p1")
            .await
            .unwrap()
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        children.sort();
        assert_eq!(children, vec!["c1", "c2"]);

        let hooks = store.children_of("snap", "c1").await.unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].kind(), EntityKind::Webhook);

        assert_eq!(store.members_holding_role("snap", "r1").await.unwrap().len(), 2);
        assert!(store.members_holding_role("snap", "r9").await.unwrap().is_empty());
        assert_eq!(store.entities("snap", EntityKind::Channel).await.unwrap().len(), 3);
    }
}
