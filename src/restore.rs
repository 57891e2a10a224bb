//! Restore orchestrator
//!
//! Re-materializes a missing or altered entity from the best available
//! snapshot. Candidates are the violation's hinted snapshot (or the space's
//! latest) followed by progressively older ones, bounded by
//! `max_snapshot_fallback`; the first success wins.
//!
//! Every create or edit is preceded by a self-action mark on the target so
//! the echo notification is dropped. Parents are restored before children
//! (a channel needs its category, a webhook its channel), and a recreated
//! parent eagerly brings back its other recorded children in the same pass.
//!
//! Recreated entities get new platform ids. The orchestrator remembers
//! original → live id for a while, so later restores of the same entity,
//! its children, and references from space settings all land on the live
//! copy instead of duplicating it.

use crate::config::EngineSettings;
use crate::entity::{ChannelState, EntityState, Guardable, OverwriteTarget};
use crate::error::{GuardError, Result};
use crate::expiry::ExpiryMap;
use crate::policy::Remediation;
use crate::provider::{Platform, SnapshotStore};
use crate::suppress::SelfActionSuppressor;
use crate::sync::{MembershipSyncer, SyncReport};
use crate::types::EntityKind;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

type EntityKey = (String, String);

fn key(space_id: &str, entity_id: &str) -> EntityKey {
    (space_id.to_string(), entity_id.to_string())
}

/// What to restore and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub space_id: String,
    pub kind: EntityKind,
    pub entity_id: String,
    /// Snapshot to try first
    pub snapshot_hint: Option<String>,
    pub remediation: Remediation,
}

impl RestoreRequest {
    pub fn new(
        space_id: impl Into<String>,
        kind: EntityKind,
        entity_id: impl Into<String>,
        remediation: Remediation,
    ) -> Self {
        Self {
            space_id: space_id.into(),
            kind,
            entity_id: entity_id.into(),
            snapshot_hint: None,
            remediation,
        }
    }

    /// Bring back a deleted entity
    pub fn recreate(space_id: impl Into<String>, kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self::new(space_id, kind, entity_id, Remediation::Recreate)
    }

    /// Edit an altered entity back to its snapshot state
    pub fn revert(space_id: impl Into<String>, kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self::new(space_id, kind, entity_id, Remediation::Revert)
    }

    /// Delete an entity that should not exist
    pub fn remove(space_id: impl Into<String>, kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self::new(space_id, kind, entity_id, Remediation::Remove)
    }

    pub fn with_hint(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_hint = Some(snapshot_id.into());
        self
    }
}

/// Result of one restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RestoreOutcome {
    /// Created again under a new id
    Recreated { id: String },
    /// Existing live entity edited back
    Updated { id: String },
    /// Live state already matched
    Unchanged { id: String },
    /// Unauthorized creation deleted
    Removed,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub space_id: String,
    pub kind: EntityKind,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub outcome: RestoreOutcome,
    /// Snapshot the restore succeeded against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// Snapshots tried
    pub attempts: usize,
    /// Original ids of children restored alongside
    #[serde(default)]
    pub children_restored: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReport>,
    pub finished_at: DateTime<Utc>,
}

impl RestoreReport {
    fn new(request: &RestoreRequest, outcome: RestoreOutcome) -> Self {
        Self {
            space_id: request.space_id.clone(),
            kind: request.kind,
            entity_id: request.entity_id.clone(),
            name: None,
            outcome,
            snapshot_id: None,
            attempts: 0,
            children_restored: Vec::new(),
            sync: None,
            finished_at: Utc::now(),
        }
    }

    fn failed(request: &RestoreRequest, attempts: usize, reason: impl Into<String>) -> Self {
        let mut report = Self::new(
            request,
            RestoreOutcome::Failed {
                reason: reason.into(),
            },
        );
        report.attempts = attempts;
        report
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, RestoreOutcome::Failed { .. })
    }

    /// Live id after the restore, when one exists
    pub fn live_id(&self) -> Option<&str> {
        match &self.outcome {
            RestoreOutcome::Recreated { id }
            | RestoreOutcome::Updated { id }
            | RestoreOutcome::Unchanged { id } => Some(id),
            RestoreOutcome::Removed | RestoreOutcome::Failed { .. } => None,
        }
    }
}

/// Summary of a full snapshot restore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRestoreReport {
    pub space_id: String,
    pub snapshot_id: String,
    /// Entities recreated, per kind
    pub recreated: BTreeMap<EntityKind, usize>,
    pub updated: usize,
    pub unchanged: usize,
    /// Already live before the restore, left alone
    pub present: usize,
    /// Children brought back by a recreated parent
    pub eagerly_restored: usize,
    pub members_synced: usize,
    pub failed: Vec<String>,
}

impl SnapshotRestoreReport {
    pub fn total_recreated(&self) -> usize {
        self.recreated.values().sum()
    }

    fn record(&mut self, kind: EntityKind, applied: &Applied) {
        match applied.outcome {
            RestoreOutcome::Recreated { .. } => *self.recreated.entry(kind).or_default() += 1,
            RestoreOutcome::Updated { .. } => self.updated += 1,
            _ => self.unchanged += 1,
        }
        self.eagerly_restored += applied.children.len();
        if let Some(sync) = &applied.sync {
            self.members_synced += sync.succeeded;
        }
    }
}

/// Result of materializing one entity
struct Applied {
    outcome: RestoreOutcome,
    live_id: String,
    name: String,
    children: Vec<String>,
    sync: Option<SyncReport>,
}

pub struct RestoreOrchestrator {
    snapshots: Arc<dyn SnapshotStore>,
    platform: Arc<dyn Platform>,
    suppressor: Arc<SelfActionSuppressor>,
    syncer: MembershipSyncer,
    /// (space, original id) → live id
    restored_ids: ExpiryMap<EntityKey, String>,
    /// (space, live id) → original id
    origins: ExpiryMap<EntityKey, String>,
    /// Serializes check-then-create per original entity
    entity_locks: Mutex<HashMap<EntityKey, Arc<AsyncMutex<()>>>>,
    max_attempts: usize,
    restored_id_ttl: Duration,
    slow_ttl: Duration,
}

impl RestoreOrchestrator {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        platform: Arc<dyn Platform>,
        suppressor: Arc<SelfActionSuppressor>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            syncer: MembershipSyncer::new(platform.clone(), settings.sync.clone()),
            snapshots,
            platform,
            suppressor,
            restored_ids: ExpiryMap::new(),
            origins: ExpiryMap::new(),
            entity_locks: Mutex::new(HashMap::new()),
            max_attempts: settings.max_snapshot_fallback.max(1),
            restored_id_ttl: settings.restored_id_ttl(),
            slow_ttl: settings.slow_self_action_ttl(),
        }
    }

    /// Autonomous restore: failures come back as a failed report
    pub async fn restore(&self, request: &RestoreRequest) -> RestoreReport {
        match self.restore_entity(request).await {
            Ok(report) => report,
            Err(e) => {
                let attempts = match &e {
                    GuardError::RestoreFailed { attempts, .. } => *attempts,
                    _ => 0,
                };
                RestoreReport::failed(request, attempts, e.to_string())
            }
        }
    }

    /// Restore with errors propagated to the caller
    pub async fn restore_entity(&self, request: &RestoreRequest) -> Result<RestoreReport> {
        match request.remediation {
            Remediation::None => {
                let outcome = RestoreOutcome::Unchanged {
                    id: request.entity_id.clone(),
                };
                return Ok(RestoreReport::new(request, outcome));
            }
            Remediation::Remove => return self.remove_created(request).await,
            Remediation::Revert | Remediation::Recreate => {}
        }
        if request.kind == EntityKind::Invite {
            return Err(GuardError::platform(
                "create_invite",
                "invites cannot be restored from a snapshot",
            ));
        }

        let space_id = request.space_id.as_str();
        let original_id = self.original_id(space_id, &request.entity_id);
        let candidates = self
            .candidates(space_id, request.snapshot_hint.as_deref())
            .await?;

        let mut attempts = 0;
        for snapshot_id in &candidates {
            attempts += 1;
            match self
                .restore_from(space_id, snapshot_id, request.kind, &original_id)
                .await
            {
                Ok(applied) => {
                    tracing::info!(
                        space = %space_id,
                        kind = %request.kind,
                        entity = %original_id,
                        snapshot = %snapshot_id,
                        attempts,
                        outcome = ?applied.outcome,
                        children = applied.children.len(),
                        "Entity restored"
                    );
                    let mut report = RestoreReport::new(request, applied.outcome);
                    report.name = Some(applied.name);
                    report.snapshot_id = Some(snapshot_id.clone());
                    report.attempts = attempts;
                    report.children_restored = applied.children;
                    report.sync = applied.sync;
                    return Ok(report);
                }
                Err(e) if e.is_permission_denied() => {
                    tracing::warn!(
                        space = %space_id,
                        kind = %request.kind,
                        entity = %original_id,
                        error = %e,
                        "Restore abandoned, insufficient privilege"
                    );
                    return Err(e);
                }
                Err(e) if e.is_fallback_candidate() => {
                    tracing::warn!(
                        space = %space_id,
                        kind = %request.kind,
                        entity = %original_id,
                        snapshot = %snapshot_id,
                        error = %e,
                        "Restore attempt failed, falling back to older snapshot"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            space = %space_id,
            kind = %request.kind,
            entity = %original_id,
            attempts,
            "Restore exhausted every candidate snapshot"
        );
        Err(GuardError::RestoreFailed {
            kind: request.kind,
            entity_id: original_id,
            attempts,
        })
    }

    /// Recreate everything a snapshot records that the live space lacks.
    ///
    /// Roles go first so channel overwrites and emoji role lists can be
    /// pointed at their recreated ids.
    pub async fn restore_snapshot(
        &self,
        space_id: &str,
        snapshot_id: &str,
    ) -> Result<SnapshotRestoreReport> {
        let channels = self
            .snapshots
            .entities(snapshot_id, EntityKind::Channel)
            .await?;
        let (categories, channels): (Vec<EntityState>, Vec<EntityState>) =
            channels.into_iter().partition(|c| {
                c.as_channel().map_or(false, ChannelState::is_category)
            });

        let mut plan = self.snapshots.entities(snapshot_id, EntityKind::Role).await?;
        plan.extend(categories);
        plan.extend(channels);
        for kind in [
            EntityKind::Emoji,
            EntityKind::Sticker,
            EntityKind::Webhook,
            EntityKind::Space,
        ] {
            plan.extend(self.snapshots.entities(snapshot_id, kind).await?);
        }
        if plan.is_empty() {
            return Err(GuardError::NoSnapshot(space_id.to_string()));
        }

        let mut report = SnapshotRestoreReport {
            space_id: space_id.to_string(),
            snapshot_id: snapshot_id.to_string(),
            ..SnapshotRestoreReport::default()
        };

        let mut brought_back: HashSet<String> = HashSet::new();
        for state in plan {
            let kind = state.kind();
            let id = state.id().to_string();
            if brought_back.contains(&id) {
                continue;
            }
            if kind != EntityKind::Space {
                match self.find_live(space_id, kind, &id).await {
                    Ok(Some(_)) => {
                        report.present += 1;
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        report.failed.push(format!("{} {}: {}", kind, id, e));
                        continue;
                    }
                }
            }

            match self.materialize(space_id, snapshot_id, state, None).await {
                Ok(applied) => {
                    report.record(kind, &applied);
                    brought_back.extend(applied.children);
                }
                Err(e) => {
                    tracing::warn!(
                        space = %space_id,
                        snapshot = %snapshot_id,
                        kind = %kind,
                        entity = %id,
                        error = %e,
                        "Entity skipped during snapshot restore"
                    );
                    report.failed.push(format!("{} {}: {}", kind, id, e));
                }
            }
        }

        tracing::info!(
            space = %space_id,
            snapshot = %snapshot_id,
            recreated = report.total_recreated(),
            failed = report.failed.len(),
            "Snapshot restore finished"
        );
        Ok(report)
    }

    /// Re-grant a role to the members a snapshot recorded for it
    pub async fn resync_role_members(
        &self,
        space_id: &str,
        snapshot_id: &str,
        role_id: &str,
    ) -> Result<SyncReport> {
        let original_id = self.original_id(space_id, role_id);
        let live_id = self
            .live_id(space_id, &original_id)
            .unwrap_or_else(|| role_id.to_string());
        let members = self
            .snapshots
            .members_holding_role(snapshot_id, &original_id)
            .await?;
        self.syncer.sync(space_id, &live_id, &members).await
    }

    /// Live id an original entity was recreated under, if remembered
    pub fn live_id(&self, space_id: &str, original_id: &str) -> Option<String> {
        self.restored_ids.get(&key(space_id, original_id))
    }

    /// Evict expired id mappings and idle entity locks
    pub fn sweep(&self) -> usize {
        let evicted = self.restored_ids.sweep() + self.origins.sweep();
        self.entity_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        evicted
    }

    pub fn clear(&self) {
        self.restored_ids.clear();
        self.origins.clear();
        self.entity_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn original_id(&self, space_id: &str, entity_id: &str) -> String {
        self.origins
            .get(&key(space_id, entity_id))
            .unwrap_or_else(|| entity_id.to_string())
    }

    fn remember(&self, space_id: &str, original_id: &str, live_id: &str) {
        self.restored_ids.insert(
            key(space_id, original_id),
            live_id.to_string(),
            self.restored_id_ttl,
        );
        self.origins.insert(
            key(space_id, live_id),
            original_id.to_string(),
            self.restored_id_ttl,
        );
    }

    fn entity_lock(&self, space_id: &str, original_id: &str) -> Arc<AsyncMutex<()>> {
        self.entity_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key(space_id, original_id))
            .or_default()
            .clone()
    }

    async fn candidates(&self, space_id: &str, hint: Option<&str>) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        match hint {
            Some(hint) => ids.push(hint.to_string()),
            None => {
                if let Some(latest) = self.snapshots.latest(space_id).await? {
                    ids.push(latest.id);
                }
            }
        }
        for info in self.snapshots.recent(space_id, self.max_attempts).await? {
            if !ids.contains(&info.id) {
                ids.push(info.id);
            }
        }
        ids.truncate(self.max_attempts);

        if ids.is_empty() {
            tracing::error!(space = %space_id, "No snapshot available to restore from");
            return Err(GuardError::NoSnapshot(space_id.to_string()));
        }
        Ok(ids)
    }

    async fn restore_from(
        &self,
        space_id: &str,
        snapshot_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Applied> {
        let state = self
            .snapshots
            .get(snapshot_id, kind, entity_id)
            .await?
            .ok_or_else(|| GuardError::NotFoundInSnapshot {
                snapshot_id: snapshot_id.to_string(),
                kind,
                entity_id: entity_id.to_string(),
            })?;
        if state.kind() != kind {
            return Err(GuardError::TypeMismatch {
                snapshot_id: snapshot_id.to_string(),
                entity_id: entity_id.to_string(),
                expected: kind,
                found: state.kind(),
            });
        }
        self.materialize(space_id, snapshot_id, state, None).await
    }

    async fn remove_created(&self, request: &RestoreRequest) -> Result<RestoreReport> {
        let space_id = request.space_id.as_str();
        let entity_id = request.entity_id.as_str();
        if self
            .platform
            .fetch(space_id, request.kind, entity_id)
            .await?
            .is_none()
        {
            let outcome = RestoreOutcome::Unchanged {
                id: entity_id.to_string(),
            };
            return Ok(RestoreReport::new(request, outcome));
        }

        self.suppressor.mark(space_id, entity_id);
        self.platform
            .delete(
                space_id,
                request.kind,
                entity_id,
                "Unauthorized creation reverted",
            )
            .await?;
        tracing::info!(
            space = %space_id,
            kind = %request.kind,
            entity = %entity_id,
            "Unauthorized creation removed"
        );
        Ok(RestoreReport::new(request, RestoreOutcome::Removed))
    }

    /// Live copy of an original entity: the remembered recreation first,
    /// then the original id
    async fn find_live(
        &self,
        space_id: &str,
        kind: EntityKind,
        original_id: &str,
    ) -> Result<Option<(String, EntityState)>> {
        if let Some(mapped) = self.live_id(space_id, original_id) {
            if let Some(live) = self.platform.fetch(space_id, kind, &mapped).await? {
                return Ok(Some((mapped, live)));
            }
        }
        Ok(self
            .platform
            .fetch(space_id, kind, original_id)
            .await?
            .map(|live| (original_id.to_string(), live)))
    }

    /// Create or edit one entity from a snapshot state.
    ///
    /// `requested_by` is the child whose restore triggered this one; it is
    /// skipped by the eager child pass because its own restore is in flight.
    fn materialize<'a>(
        &'a self,
        space_id: &'a str,
        snapshot_id: &'a str,
        state: EntityState,
        requested_by: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Applied>> {
        async move {
            let original_id = state.id().to_string();
            let kind = state.kind();
            let state = self.resolve_refs(space_id, snapshot_id, state).await?;
            let name = state.display_name().to_string();

            let lock = self.entity_lock(space_id, &original_id);
            let guard = lock.lock().await;
            let (outcome, live_id) = match self.find_live(space_id, kind, &original_id).await? {
                Some((live_id, live)) if live.same_fields(&state) => (
                    RestoreOutcome::Unchanged {
                        id: live_id.clone(),
                    },
                    live_id,
                ),
                Some((live_id, _)) => {
                    self.suppressor.mark(space_id, &live_id);
                    self.platform
                        .edit(space_id, &live_id, &state.clone().with_id(live_id.clone()))
                        .await?;
                    (
                        RestoreOutcome::Updated {
                            id: live_id.clone(),
                        },
                        live_id,
                    )
                }
                None => {
                    if kind == EntityKind::Space {
                        return Err(GuardError::platform(
                            "edit_space",
                            format!("space '{}' is not reachable", space_id),
                        ));
                    }
                    if matches!(&state, EntityState::Role(role) if role.managed) {
                        return Err(GuardError::platform(
                            "create_role",
                            "integration-managed roles cannot be recreated",
                        ));
                    }
                    self.suppressor.mark(space_id, &original_id);
                    let new_id = self.platform.create(space_id, &state).await?;
                    self.suppressor.mark(space_id, &new_id);
                    self.remember(space_id, &original_id, &new_id);
                    (RestoreOutcome::Recreated { id: new_id.clone() }, new_id)
                }
            };
            drop(guard);

            let mut applied = Applied {
                outcome,
                live_id,
                name,
                children: Vec::new(),
                sync: None,
            };
            if matches!(applied.outcome, RestoreOutcome::Recreated { .. }) {
                if kind == EntityKind::Role {
                    applied.sync = self
                        .resync_recreated(space_id, snapshot_id, &original_id, &applied.live_id)
                        .await;
                }
                applied.children = self
                    .restore_children(space_id, snapshot_id, &original_id, requested_by)
                    .await;
            }
            Ok::<_, GuardError>(applied)
        }
        .boxed()
    }

    /// Point parent and role references at live ids, restoring a missing
    /// parent first
    async fn resolve_refs(
        &self,
        space_id: &str,
        snapshot_id: &str,
        state: EntityState,
    ) -> Result<EntityState> {
        let child_id = state.id().to_string();
        match state {
            EntityState::Channel(mut channel) => {
                if let Some(parent_id) = channel.parent_id.clone() {
                    let live_parent = self
                        .ensure_parent(space_id, snapshot_id, &parent_id, &child_id)
                        .await?;
                    channel.parent_id = Some(live_parent);
                }
                for overwrite in &mut channel.overwrites {
                    if overwrite.target == OverwriteTarget::Role {
                        if let Some(live) = self.live_id(space_id, &overwrite.id) {
                            overwrite.id = live;
                        }
                    }
                }
                Ok(EntityState::Channel(channel))
            }
            EntityState::Webhook(mut webhook) => {
                webhook.channel_id = self
                    .ensure_parent(space_id, snapshot_id, &webhook.channel_id, &child_id)
                    .await?;
                Ok(EntityState::Webhook(webhook))
            }
            EntityState::Emoji(mut emoji) => {
                for role in &mut emoji.roles {
                    if let Some(live) = self.live_id(space_id, role) {
                        *role = live;
                    }
                }
                Ok(EntityState::Emoji(emoji))
            }
            EntityState::Space(mut settings) => {
                for slot in settings.channel_refs_mut() {
                    if let Some(channel_id) = slot.as_mut() {
                        if let Some(live) = self.live_id(space_id, channel_id) {
                            *channel_id = live;
                        }
                    }
                }
                Ok(EntityState::Space(settings))
            }
            other => Ok(other),
        }
    }

    /// Live id of a parent channel, recreating it from the snapshot when absent
    async fn ensure_parent(
        &self,
        space_id: &str,
        snapshot_id: &str,
        parent_id: &str,
        child_id: &str,
    ) -> Result<String> {
        if let Some((live_id, _)) = self
            .find_live(space_id, EntityKind::Channel, parent_id)
            .await?
        {
            return Ok(live_id);
        }

        let parent = self
            .snapshots
            .get(snapshot_id, EntityKind::Channel, parent_id)
            .await?
            .ok_or_else(|| GuardError::NotFoundInSnapshot {
                snapshot_id: snapshot_id.to_string(),
                kind: EntityKind::Channel,
                entity_id: parent_id.to_string(),
            })?;

        tracing::info!(
            space = %space_id,
            parent = %parent_id,
            child = %child_id,
            "Parent missing, restoring it first"
        );
        let applied = self
            .materialize(space_id, snapshot_id, parent, Some(child_id))
            .await?;
        self.suppressor
            .mark_for(space_id, &applied.live_id, self.slow_ttl);
        Ok(applied.live_id)
    }

    /// Recreate the recorded children of a just-recreated parent that are
    /// missing live; returns their original ids
    async fn restore_children(
        &self,
        space_id: &str,
        snapshot_id: &str,
        parent_id: &str,
        skip: Option<&str>,
    ) -> Vec<String> {
        let children = match self.snapshots.children_of(snapshot_id, parent_id).await {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(
                    space = %space_id,
                    parent = %parent_id,
                    error = %e,
                    "Failed to list children for eager restore"
                );
                return Vec::new();
            }
        };

        let mut restored = Vec::new();
        for child in children {
            let child_id = child.id().to_string();
            let kind = child.kind();
            if kind == EntityKind::Invite || skip == Some(child_id.as_str()) {
                continue;
            }
            match self.find_live(space_id, kind, &child_id).await {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    tracing::warn!(space = %space_id, child = %child_id, error = %e, "Child lookup failed");
                    continue;
                }
            }

            match self.materialize(space_id, snapshot_id, child, None).await {
                Ok(applied) => {
                    restored.push(child_id);
                    restored.extend(applied.children);
                }
                Err(e) => {
                    tracing::warn!(
                        space = %space_id,
                        parent = %parent_id,
                        child = %child_id,
                        error = %e,
                        "Eager child restore failed"
                    );
                }
            }
        }
        restored
    }

    async fn resync_recreated(
        &self,
        space_id: &str,
        snapshot_id: &str,
        original_id: &str,
        live_id: &str,
    ) -> Option<SyncReport> {
        let members = match self
            .snapshots
            .members_holding_role(snapshot_id, original_id)
            .await
        {
            Ok(members) if !members.is_empty() => members,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(space = %space_id, role = %original_id, error = %e, "Failed to read role members");
                return None;
            }
        };

        match self.syncer.sync(space_id, live_id, &members).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(space = %space_id, role = %live_id, error = %e, "Role membership sync failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{PermissionOverwrite, RoleState, WebhookState};
    use crate::permissions::Permissions;
    use crate::provider::memory::{MemoryPlatform, MemorySnapshotStore, PlatformCall};
    use crate::types::Snapshot;

    struct Fixture {
        snapshots: Arc<MemorySnapshotStore>,
        platform: Arc<MemoryPlatform>,
        suppressor: Arc<SelfActionSuppressor>,
        orchestrator: RestoreOrchestrator,
    }

    fn fixture() -> Fixture {
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let platform = Arc::new(MemoryPlatform::new("bot"));
        let suppressor = Arc::new(SelfActionSuppressor::new(Duration::from_secs(10)));
        let orchestrator = RestoreOrchestrator::new(
            snapshots.clone(),
            platform.clone(),
            suppressor.clone(),
            &EngineSettings::default(),
        );
        Fixture {
            snapshots,
            platform,
            suppressor,
            orchestrator,
        }
    }

    fn aged(id: &str, mins: i64) -> Snapshot {
        Snapshot::new(id, "s1", Utc::now() - chrono::Duration::minutes(mins))
    }

    fn mods() -> EntityState {
        EntityState::Role(
            RoleState::new("r1", "Mods")
                .with_color(0x00ff00)
                .with_permissions(Permissions::KICK_MEMBERS),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreate_marks_and_remembers() {
        let f = fixture();
        f.snapshots.insert(aged("snap", 1).with_entity(mods())).await;

        let report = f
            .orchestrator
            .restore(&RestoreRequest::recreate("s1", EntityKind::Role, "r1"))
            .await;
        let new_id = report.live_id().unwrap().to_string();
        assert!(matches!(report.outcome, RestoreOutcome::Recreated { .. }));
        assert_eq!(report.attempts, 1);
        assert!(f.suppressor.is_self_action("s1", "r1"));
        assert!(f.suppressor.is_self_action("s1", &new_id));
        assert_eq!(f.orchestrator.live_id("s1", "r1").as_deref(), Some(new_id.as_str()));

        let live = f.platform.fetch("s1", EntityKind::Role, &new_id).await.unwrap().unwrap();
        assert!(live.same_fields(&mods()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_twice_is_idempotent() {
        let f = fixture();
        f.snapshots.insert(aged("snap", 1).with_entity(mods())).await;
        let request = RestoreRequest::recreate("s1", EntityKind::Role, "r1");

        let first = f.orchestrator.restore(&request).await;
        let first_live_id = first.live_id().map(str::to_string);
        let second = f.orchestrator.restore(&request).await;
        assert!(matches!(second.outcome, RestoreOutcome::Unchanged { .. }));
        assert_eq!(second.live_id(), first_live_id.as_deref());
        assert_eq!(f.platform.live("s1", EntityKind::Role).await.len(), 1);
        assert_eq!(
            f.platform
                .count_calls(|c| matches!(c, PlatformCall::Create { .. }))
                .await,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_edits_in_place() {
        let f = fixture();
        f.snapshots.insert(aged("snap", 1).with_entity(mods())).await;
        f.platform
            .put(
                "s1",
                EntityState::Role(RoleState::new("r1", "Hacked").with_permissions(Permissions::ADMINISTRATOR)),
            )
            .await;

        let report = f
            .orchestrator
            .restore(&RestoreRequest::revert("s1", EntityKind::Role, "r1"))
            .await;
        assert_eq!(report.outcome, RestoreOutcome::Updated { id: "r1".to_string() });
        let live = f.platform.fetch("s1", EntityKind::Role, "r1").await.unwrap().unwrap();
        assert_eq!(live.display_name(), "Mods");
        assert!(f.suppressor.is_self_action("s1", "r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_older_snapshot() {
        let f = fixture();
        f.snapshots.insert(aged("s-old", 30).with_entity(mods())).await;
        f.snapshots.insert(aged("s-mid", 20)).await;
        f.snapshots.insert(aged("s-new", 10)).await;

        let report = f
            .orchestrator
            .restore(&RestoreRequest::recreate("s1", EntityKind::Role, "r1"))
            .await;
        assert!(report.succeeded());
        assert_eq!(report.attempts, 3);
        assert_eq!(report.snapshot_id.as_deref(), Some("s-old"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_reported_not_thrown() {
        let f = fixture();
        f.snapshots.insert(aged("s-a", 5)).await;
        f.snapshots.insert(aged("s-b", 1)).await;
        let request = RestoreRequest::recreate("s1", EntityKind::Role, "r404");

        let report = f.orchestrator.restore(&request).await;
        assert!(!report.succeeded());
        assert_eq!(report.attempts, 2);

        let err = f.orchestrator.restore_entity(&request).await.unwrap_err();
        assert!(matches!(err, GuardError::RestoreFailed { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_snapshot() {
        let f = fixture();
        let err = f
            .orchestrator
            .restore_entity(&RestoreRequest::recreate("s1", EntityKind::Role, "r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::NoSnapshot(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_stops_fallback() {
        let f = fixture();
        f.snapshots.insert(aged("s-a", 5).with_entity(mods())).await;
        f.snapshots.insert(aged("s-b", 1).with_entity(mods())).await;
        f.platform.deny("create_role").await;

        let err = f
            .orchestrator
            .restore_entity(&RestoreRequest::recreate("s1", EntityKind::Role, "r1"))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_webhook_recreated_under_remembered_channel() {
        let f = fixture();
        f.snapshots
            .insert(
                aged("snap", 1)
                    .with_entity(EntityState::Channel(ChannelState::text("c1", "deploys")))
                    .with_entity(EntityState::Webhook(WebhookState::new("w1", "ci", "c1")))
                    .with_entity(EntityState::Webhook(WebhookState::new("w2", "alerts", "c1"))),
            )
            .await;

        // Channel recreation brings both webhooks back under the new channel id
        let report = f
            .orchestrator
            .restore(&RestoreRequest::recreate("s1", EntityKind::Channel, "c1"))
            .await;
        let channel_id = report.live_id().unwrap().to_string();
        assert_eq!(report.children_restored.len(), 2);

        let hooks = f.platform.live("s1", EntityKind::Webhook).await;
        assert_eq!(hooks.len(), 2);
        for hook in hooks {
            match hook {
                EntityState::Webhook(w) => assert_eq!(w.channel_id, channel_id),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_created() {
        let f = fixture();
        f.platform
            .put("s1", EntityState::Role(RoleState::new("r9", "Spam")))
            .await;
        let request = RestoreRequest::remove("s1", EntityKind::Role, "r9");

        let report = f.orchestrator.restore(&request).await;
        assert_eq!(report.outcome, RestoreOutcome::Removed);
        assert!(f.suppressor.is_self_action("s1", "r9"));

        let again = f.orchestrator.restore(&request).await;
        assert!(matches!(again.outcome, RestoreOutcome::Unchanged { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_recreated_entity_restores_from_original() {
        let f = fixture();
        f.snapshots.insert(aged("snap", 1).with_entity(mods())).await;
        let first = f
            .orchestrator
            .restore(&RestoreRequest::recreate("s1", EntityKind::Role, "r1"))
            .await;
        let first_id = first.live_id().unwrap().to_string();
        f.platform.take("s1", EntityKind::Role, &first_id).await;

        let second = f
            .orchestrator
            .restore(&RestoreRequest::recreate("s1", EntityKind::Role, &first_id))
            .await;
        assert!(matches!(second.outcome, RestoreOutcome::Recreated { .. }));
        assert_ne!(second.live_id(), Some(first_id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_restore_points_overwrites_at_recreated_roles() {
        let f = fixture();
        let mut staff = ChannelState::text("c1", "staff");
        staff.overwrites.push(PermissionOverwrite {
            id: "r1".to_string(),
            target: OverwriteTarget::Role,
            allow: Permissions::VIEW_CHANNEL,
            deny: Permissions::empty(),
        });
        f.snapshots
            .insert(
                aged("snap", 1)
                    .with_entity(EntityState::Channel(staff))
                    .with_entity(mods()),
            )
            .await;

        let report = f.orchestrator.restore_snapshot("s1", "snap").await.unwrap();
        assert_eq!(report.recreated.get(&EntityKind::Role), Some(&1));
        assert_eq!(report.recreated.get(&EntityKind::Channel), Some(&1));
        assert!(report.failed.is_empty());

        let role_id = f.orchestrator.live_id("s1", "r1").unwrap();
        let channel_id = f.orchestrator.live_id("s1", "c1").unwrap();
        let channel = f
            .platform
            .fetch("s1", EntityKind::Channel, &channel_id)
            .await
            .unwrap()
            .unwrap();
        let overwrites = &channel.as_channel().unwrap().overwrites;
        assert_eq!(overwrites.len(), 1);
        assert_eq!(overwrites[0].id, role_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_managed_role_is_not_recreated() {
        let f = fixture();
        let mut role = RoleState::new("r1", "Integration");
        role.managed = true;
        f.snapshots
            .insert(aged("snap", 1).with_entity(EntityState::Role(role)))
            .await;
        let report = f
            .orchestrator
            .restore(&RestoreRequest::recreate("s1", EntityKind::Role, "r1"))
            .await;
        assert!(!report.succeeded());
        assert!(f.platform.calls().await.is_empty());
    }
}
