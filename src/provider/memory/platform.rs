use crate::entity::{EntityState, Guardable, VerificationLevel};
use crate::error::{GuardError, Result};
use crate::provider::Platform;
use crate::types::EntityKind;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// A mutation the engine issued against the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Create { kind: EntityKind, id: String },
    Edit { kind: EntityKind, id: String },
    Delete { kind: EntityKind, id: String },
    Grant { user: String, role: String },
    Revoke { user: String, role: String },
    Kick { user: String },
    Ban { user: String },
    Timeout { user: String },
    SetVerification { level: VerificationLevel },
}

#[derive(Default)]
struct LiveSpace {
    entities: HashMap<EntityKind, HashMap<String, EntityState>>,
    members: HashMap<String, HashSet<String>>,
    banned: HashSet<String>,
    timed_out: HashMap<String, Duration>,
    verification: VerificationLevel,
}

#[derive(Default)]
struct Failures {
    /// Operation names that always fail with permission denied
    denied_ops: HashSet<String>,
    /// Members whose role grants fail
    grant_failures: HashSet<String>,
    /// Names whose creation is rejected
    rejected_names: HashSet<String>,
}

/// In-memory platform simulating live space state
pub struct MemoryPlatform {
    self_id: String,
    spaces: RwLock<HashMap<String, LiveSpace>>,
    calls: RwLock<Vec<PlatformCall>>,
    failures: RwLock<Failures>,
    next_id: AtomicU64,
}

impl MemoryPlatform {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            spaces: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            failures: RwLock::new(Failures::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seed a live entity without recording a call
    pub async fn put(&self, space_id: &str, state: EntityState) {
        let mut spaces = self.spaces.write().await;
        spaces
            .entry(space_id.to_string())
            .or_default()
            .entities
            .entry(state.kind())
            .or_default()
            .insert(state.id().to_string(), state);
    }

    /// Remove a live entity without recording a call
    pub async fn take(&self, space_id: &str, kind: EntityKind, entity_id: &str) -> Option<EntityState> {
        let mut spaces = self.spaces.write().await;
        spaces
            .get_mut(space_id)
            .and_then(|s| s.entities.get_mut(&kind))
            .and_then(|m| m.remove(entity_id))
    }

    /// Seed a member with the given roles
    pub async fn set_member_roles<I, S>(&self, space_id: &str, user_id: &str, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spaces = self.spaces.write().await;
        spaces
            .entry(space_id.to_string())
            .or_default()
            .members
            .insert(user_id.to_string(), roles.into_iter().map(Into::into).collect());
    }

    /// Make every call of `operation` fail with permission denied
    pub async fn deny(&self, operation: &str) {
        self.failures
            .write()
            .await
            .denied_ops
            .insert(operation.to_string());
    }

    /// Make role grants to `user_id` fail
    pub async fn fail_grants_for(&self, user_id: &str) {
        self.failures
            .write()
            .await
            .grant_failures
            .insert(user_id.to_string());
    }

    /// Reject creation of entities with this display name
    pub async fn reject_creation_of(&self, name: &str) {
        self.failures
            .write()
            .await
            .rejected_names
            .insert(name.to_string());
    }

    pub async fn calls(&self) -> Vec<PlatformCall> {
        self.calls.read().await.clone()
    }

    /// Number of recorded calls matching a predicate
    pub async fn count_calls(&self, pred: impl Fn(&PlatformCall) -> bool) -> usize {
        self.calls.read().await.iter().filter(|c| pred(c)).count()
    }

    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Live entities of one kind
    pub async fn live(&self, space_id: &str, kind: EntityKind) -> Vec<EntityState> {
        self.spaces
            .read()
            .await
            .get(space_id)
            .and_then(|s| s.entities.get(&kind))
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Live entity of a kind by display name
    pub async fn find_by_name(&self, space_id: &str, kind: EntityKind, name: &str) -> Option<EntityState> {
        self.live(space_id, kind)
            .await
            .into_iter()
            .find(|e| e.display_name() == name)
    }

    pub async fn is_banned(&self, space_id: &str, user_id: &str) -> bool {
        self.spaces
            .read()
            .await
            .get(space_id)
            .map_or(false, |s| s.banned.contains(user_id))
    }

    pub async fn is_member(&self, space_id: &str, user_id: &str) -> bool {
        self.spaces
            .read()
            .await
            .get(space_id)
            .map_or(false, |s| s.members.contains_key(user_id))
    }

    pub async fn timeout_of(&self, space_id: &str, user_id: &str) -> Option<Duration> {
        self.spaces
            .read()
            .await
            .get(space_id)
            .and_then(|s| s.timed_out.get(user_id).copied())
    }

    pub async fn verification_level(&self, space_id: &str) -> VerificationLevel {
        self.spaces
            .read()
            .await
            .get(space_id)
            .map(|s| s.verification)
            .unwrap_or_default()
    }

    async fn record(&self, call: PlatformCall) {
        self.calls.write().await.push(call);
    }

    async fn check(&self, operation: &str) -> Result<()> {
        if self.failures.read().await.denied_ops.contains(operation) {
            return Err(GuardError::permission_denied(
                operation,
                "missing permission or target outranks the engine",
            ));
        }
        Ok(())
    }

    fn allocate_id(&self) -> String {
        format!("new-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn fetch(
        &self,
        space_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<EntityState>> {
        Ok(self
            .spaces
            .read()
            .await
            .get(space_id)
            .and_then(|s| s.entities.get(&kind))
            .and_then(|m| m.get(entity_id))
            .cloned())
    }

    async fn create(&self, space_id: &str, state: &EntityState) -> Result<String> {
        let kind = state.kind();
        self.check(&format!("create_{}", kind)).await?;
        if matches!(kind, EntityKind::Space) {
            return Err(GuardError::platform("create_space", "spaces cannot be created"));
        }
        if self
            .failures
            .read()
            .await
            .rejected_names
            .contains(state.display_name())
        {
            return Err(GuardError::platform(
                format!("create_{}", kind),
                format!("'{}' rejected by platform", state.display_name()),
            ));
        }

        let id = self.allocate_id();
        self.put(space_id, state.clone().with_id(id.clone())).await;
        self.record(PlatformCall::Create {
            kind,
            id: id.clone(),
        })
        .await;
        Ok(id)
    }

    async fn edit(&self, space_id: &str, entity_id: &str, state: &EntityState) -> Result<()> {
        let kind = state.kind();
        self.check(&format!("edit_{}", kind)).await?;
        {
            let mut spaces = self.spaces.write().await;
            let slot = spaces
                .get_mut(space_id)
                .and_then(|s| s.entities.get_mut(&kind))
                .and_then(|m| m.get_mut(entity_id))
                .ok_or_else(|| {
                    GuardError::platform(format!("edit_{}", kind), format!("unknown {}", entity_id))
                })?;
            *slot = state.clone().with_id(entity_id);
        }
        self.record(PlatformCall::Edit {
            kind,
            id: entity_id.to_string(),
        })
        .await;
        Ok(())
    }

    async fn delete(
        &self,
        space_id: &str,
        kind: EntityKind,
        entity_id: &str,
        _reason: &str,
    ) -> Result<()> {
        self.check(&format!("delete_{}", kind)).await?;
        if self.take(space_id, kind, entity_id).await.is_none() {
            return Err(GuardError::platform(
                format!("delete_{}", kind),
                format!("unknown {}", entity_id),
            ));
        }
        self.record(PlatformCall::Delete {
            kind,
            id: entity_id.to_string(),
        })
        .await;
        Ok(())
    }

    async fn member_roles(&self, space_id: &str, user_id: &str) -> Result<Vec<String>> {
        let spaces = self.spaces.read().await;
        let mut roles: Vec<String> = spaces
            .get(space_id)
            .and_then(|s| s.members.get(user_id))
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        roles.sort();
        Ok(roles)
    }

    async fn role_members(&self, space_id: &str, role_id: &str) -> Result<Vec<String>> {
        let spaces = self.spaces.read().await;
        Ok(spaces
            .get(space_id)
            .map(|s| {
                s.members
                    .iter()
                    .filter(|(_, roles)| roles.contains(role_id))
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn grant_role(&self, space_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        self.check("grant_role").await?;
        if self.failures.read().await.grant_failures.contains(user_id) {
            return Err(GuardError::RateLimited {
                operation: "grant_role".to_string(),
                retry_after_ms: 500,
            });
        }
        self.spaces
            .write()
            .await
            .entry(space_id.to_string())
            .or_default()
            .members
            .entry(user_id.to_string())
            .or_default()
            .insert(role_id.to_string());
        self.record(PlatformCall::Grant {
            user: user_id.to_string(),
            role: role_id.to_string(),
        })
        .await;
        Ok(())
    }

    async fn revoke_role(&self, space_id: &str, user_id: &str, role_id: &str) -> Result<()> {
        self.check("revoke_role").await?;
        if let Some(roles) = self
            .spaces
            .write()
            .await
            .get_mut(space_id)
            .and_then(|s| s.members.get_mut(user_id))
        {
            roles.remove(role_id);
        }
        self.record(PlatformCall::Revoke {
            user: user_id.to_string(),
            role: role_id.to_string(),
        })
        .await;
        Ok(())
    }

    async fn kick(&self, space_id: &str, user_id: &str, _reason: &str) -> Result<()> {
        self.check("kick").await?;
        if let Some(space) = self.spaces.write().await.get_mut(space_id) {
            space.members.remove(user_id);
        }
        self.record(PlatformCall::Kick {
            user: user_id.to_string(),
        })
        .await;
        Ok(())
    }

    async fn ban(&self, space_id: &str, user_id: &str, _reason: &str) -> Result<()> {
        self.check("ban").await?;
        {
            let mut spaces = self.spaces.write().await;
            let space = spaces.entry(space_id.to_string()).or_default();
            space.members.remove(user_id);
            space.banned.insert(user_id.to_string());
        }
        self.record(PlatformCall::Ban {
            user: user_id.to_string(),
        })
        .await;
        Ok(())
    }

    async fn timeout(
        &self,
        space_id: &str,
        user_id: &str,
        duration: Duration,
        _reason: &str,
    ) -> Result<()> {
        self.check("timeout").await?;
        self.spaces
            .write()
            .await
            .entry(space_id.to_string())
            .or_default()
            .timed_out
            .insert(user_id.to_string(), duration);
        self.record(PlatformCall::Timeout {
            user: user_id.to_string(),
        })
        .await;
        Ok(())
    }

    async fn set_verification_level(&self, space_id: &str, level: VerificationLevel) -> Result<()> {
        self.check("set_verification_level").await?;
        self.spaces
            .write()
            .await
            .entry(space_id.to_string())
            .or_default()
            .verification = level;
        self.record(PlatformCall::SetVerification { level }).await;
        Ok(())
    }
}
