//! Core data model for the guard engine
//!
//! All types use camelCase JSON serialization for wire compatibility;
//! enums that appear in configuration files use snake_case values.

use crate::entity::{EntityState, Guardable};
use crate::restore::RestoreReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Actor id used when the audit trail could not attribute a change
pub const UNKNOWN_ACTOR: &str = "unknown";

/// Kind of structural entity tracked in a space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Role,
    Channel,
    Emoji,
    Sticker,
    Webhook,
    Invite,
    Space,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Channel => "channel",
            Self::Emoji => "emoji",
            Self::Sticker => "sticker",
            Self::Webhook => "webhook",
            Self::Invite => "invite",
            Self::Space => "space",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An (entity kind, change kind) pair, rendered as `role_delete` etc.
///
/// Used as the audit trail lookup key and as the target of
/// action-level whitelist entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKind {
    pub entity: EntityKind,
    pub change: ChangeKind,
}

impl ActionKind {
    pub fn new(entity: EntityKind, change: ChangeKind) -> Self {
        Self { entity, change }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.entity, self.change)
    }
}

/// A single change notification from the event source
///
/// Ephemeral: created per notification and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub space_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<EntityState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<EntityState>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Notification for a newly created entity
    pub fn created(space_id: impl Into<String>, state: EntityState) -> Self {
        Self {
            entity_kind: state.kind(),
            entity_id: state.id().to_string(),
            space_id: space_id.into(),
            before: None,
            after: Some(state),
            received_at: Utc::now(),
        }
    }

    /// Notification for an edited entity
    pub fn updated(space_id: impl Into<String>, before: EntityState, after: EntityState) -> Self {
        Self {
            entity_kind: after.kind(),
            entity_id: after.id().to_string(),
            space_id: space_id.into(),
            before: Some(before),
            after: Some(after),
            received_at: Utc::now(),
        }
    }

    /// Notification for a deleted entity
    pub fn deleted(space_id: impl Into<String>, state: EntityState) -> Self {
        Self {
            entity_kind: state.kind(),
            entity_id: state.id().to_string(),
            space_id: space_id.into(),
            before: Some(state),
            after: None,
            received_at: Utc::now(),
        }
    }

    /// Derive the change kind from the before/after pair
    pub fn change_kind(&self) -> Option<ChangeKind> {
        match (&self.before, &self.after) {
            (None, Some(_)) => Some(ChangeKind::Create),
            (Some(_), Some(_)) => Some(ChangeKind::Update),
            (Some(_), None) => Some(ChangeKind::Delete),
            (None, None) => None,
        }
    }

    /// The most recent observed state of the entity
    pub fn latest_state(&self) -> Option<&EntityState> {
        self.after.as_ref().or(self.before.as_ref())
    }
}

/// Executor attribution fetched from the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditAttribution {
    pub executor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// Violation severity; ordering is total (critical > high > medium > low)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High and critical use the `on_violation` action list
    pub fn is_violation(&self) -> bool {
        *self >= Severity::High
    }

    /// One step up, saturating at critical
    pub fn elevated(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified violation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    RoleCreateUnauthorized,
    RoleUpdateUnauthorized,
    RolePermissionEscalation,
    RoleDeleteBlocked,
    ChannelCreateUnauthorized,
    ChannelUpdateUnauthorized,
    ChannelDeleteBlocked,
    EmojiCreateUnauthorized,
    EmojiUpdateUnauthorized,
    EmojiDeleteBlocked,
    StickerCreateUnauthorized,
    StickerUpdateUnauthorized,
    StickerDeleteBlocked,
    WebhookCreateUnauthorized,
    WebhookUpdateUnauthorized,
    WebhookDeleteBlocked,
    WebhookLimitExceeded,
    InviteCreateUnauthorized,
    InviteLimitExceeded,
    InviteDeleteLogged,
    SpaceUpdateBlocked,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleCreateUnauthorized => "role_create_unauthorized",
            Self::RoleUpdateUnauthorized => "role_update_unauthorized",
            Self::RolePermissionEscalation => "role_permission_escalation",
            Self::RoleDeleteBlocked => "role_delete_blocked",
            Self::ChannelCreateUnauthorized => "channel_create_unauthorized",
            Self::ChannelUpdateUnauthorized => "channel_update_unauthorized",
            Self::ChannelDeleteBlocked => "channel_delete_blocked",
            Self::EmojiCreateUnauthorized => "emoji_create_unauthorized",
            Self::EmojiUpdateUnauthorized => "emoji_update_unauthorized",
            Self::EmojiDeleteBlocked => "emoji_delete_blocked",
            Self::StickerCreateUnauthorized => "sticker_create_unauthorized",
            Self::StickerUpdateUnauthorized => "sticker_update_unauthorized",
            Self::StickerDeleteBlocked => "sticker_delete_blocked",
            Self::WebhookCreateUnauthorized => "webhook_create_unauthorized",
            Self::WebhookUpdateUnauthorized => "webhook_update_unauthorized",
            Self::WebhookDeleteBlocked => "webhook_delete_blocked",
            Self::WebhookLimitExceeded => "webhook_limit_exceeded",
            Self::InviteCreateUnauthorized => "invite_create_unauthorized",
            Self::InviteLimitExceeded => "invite_limit_exceeded",
            Self::InviteDeleteLogged => "invite_delete_logged",
            Self::SpaceUpdateBlocked => "space_update_blocked",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configurable remediation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardAction {
    Log,
    Notify,
    Kick,
    Ban,
    RemoveRoles,
    Timeout,
    Restore,
    Lockdown,
}

impl GuardAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Notify => "notify",
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::RemoveRoles => "remove_roles",
            Self::Timeout => "timeout",
            Self::Restore => "restore",
            Self::Lockdown => "lockdown",
        }
    }

    /// Actions that act directly on the offending member
    pub fn targets_actor(&self) -> bool {
        matches!(self, Self::Kick | Self::Ban | Self::RemoveRoles | Self::Timeout)
    }
}

impl fmt::Display for GuardAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one executed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub action: GuardAction,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActionOutcome {
    pub fn ok(action: GuardAction) -> Self {
        Self {
            action,
            ok: true,
            detail: None,
        }
    }

    pub fn ok_with(action: GuardAction, detail: impl Into<String>) -> Self {
        Self {
            action,
            ok: true,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(action: GuardAction, detail: impl Into<String>) -> Self {
        Self {
            action,
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// A classified, write-once violation record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Unique violation identifier (vio-<uuid>)
    pub id: String,
    pub space_id: String,
    pub actor_id: String,
    pub violation_type: ViolationType,
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Snapshot the restore step used, or should try first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_hint: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub actions_taken: Vec<ActionOutcome>,
}

impl Violation {
    pub fn new(
        space_id: impl Into<String>,
        actor_id: impl Into<String>,
        violation_type: ViolationType,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("vio-{}", uuid::Uuid::new_v4()),
            space_id: space_id.into(),
            actor_id: actor_id.into(),
            violation_type,
            description: description.into(),
            severity,
            target_id: None,
            snapshot_hint: None,
            timestamp: Utc::now(),
            actions_taken: Vec::new(),
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_snapshot_hint(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_hint = Some(snapshot_id.into());
        self
    }

    /// True when no attribution was available for the change
    pub fn actor_unknown(&self) -> bool {
        self.actor_id == UNKNOWN_ACTOR
    }
}

/// Whitelist entry scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistKind {
    User,
    Role,
    Channel,
    Permission,
    Action,
}

impl WhitelistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Role => "role",
            Self::Channel => "channel",
            Self::Permission => "permission",
            Self::Action => "action",
        }
    }
}

/// Persisted whitelist entry; written only by the administrative layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistEntry {
    pub space_id: String,
    pub kind: WhitelistKind,
    pub target_id: String,
    #[serde(default)]
    pub reason: String,
    pub added_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WhitelistEntry {
    pub fn new(
        space_id: impl Into<String>,
        kind: WhitelistKind,
        target_id: impl Into<String>,
        added_by: impl Into<String>,
    ) -> Self {
        Self {
            space_id: space_id.into(),
            kind,
            target_id: target_id.into(),
            reason: String::new(),
            added_by: added_by.into(),
            expires_at: None,
            active: true,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Active and not past its expiry
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |at| at > now)
    }

    /// True when this entry matches the given scope
    pub fn matches(&self, space_id: &str, kind: WhitelistKind, target_id: &str) -> bool {
        self.space_id == space_id && self.kind == kind && self.target_id == target_id
    }
}

/// Snapshot header without its entity payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub id: String,
    pub space_id: String,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
}

/// Immutable point-in-time capture of a space's structural state
///
/// Produced by the capture pipeline; the guard engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub space_id: String,
    pub timestamp: DateTime<Utc>,
    /// Entities keyed by kind, then by id
    #[serde(default)]
    pub entities: HashMap<EntityKind, BTreeMap<String, EntityState>>,
    /// Role id → member ids that held it at capture time
    #[serde(default)]
    pub role_members: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub checksum: String,
}

impl Snapshot {
    pub fn new(id: impl Into<String>, space_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            space_id: space_id.into(),
            timestamp,
            entities: HashMap::new(),
            role_members: HashMap::new(),
            checksum: String::new(),
        }
    }

    /// Add an entity, keyed by its own kind and id
    pub fn with_entity(mut self, state: EntityState) -> Self {
        self.entities
            .entry(state.kind())
            .or_default()
            .insert(state.id().to_string(), state);
        self
    }

    /// Record the members holding a role
    pub fn with_role_members<I, S>(mut self, role_id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_members
            .insert(role_id.into(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Look up an entity under any kind
    pub fn find(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.values().find_map(|by_id| by_id.get(entity_id))
    }

    /// All recorded entities of one kind
    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = &EntityState> {
        self.entities.get(&kind).into_iter().flat_map(|m| m.values())
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            id: self.id.clone(),
            space_id: self.space_id.clone(),
            timestamp: self.timestamp,
            checksum: self.checksum.clone(),
        }
    }
}

/// Structured summary posted to the notification sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum Notification {
    /// A violation was classified and acted upon
    Violation {
        violation: Violation,
        /// Violations recorded for the same actor in the tally window
        actor_tally: u64,
        /// Outcome of the restore action, when one ran
        #[serde(default, skip_serializing_if = "Option::is_none")]
        restore: Option<RestoreReport>,
    },
    /// Outcome of a restore attempt
    Restore { report: RestoreReport },
    /// The space was locked down
    Lockdown {
        space_id: String,
        triggered_by: String,
    },
}

impl Notification {
    pub fn space_id(&self) -> &str {
        match self {
            Self::Violation { violation, .. } => &violation.space_id,
            Self::Restore { report } => &report.space_id,
            Self::Lockdown { space_id, .. } => space_id,
        }
    }
}

/// Why an event left the pipeline without action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    SelfAction,
    ConfigurationMissing,
    Disabled,
    Unclassified,
    AttributionUnavailable,
    OwnAction,
    Whitelisted,
    NoChange,
    RestoreInProgress,
}

/// Immediate result of handing an event to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Exited at a gate
    Dropped(DropReason),
    /// Passed every gate and is waiting for the debounce window to settle
    Scheduled { fingerprint: u64 },
}

impl Disposition {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::RoleState;

    #[test]
    fn test_action_kind_display() {
        let action = ActionKind::new(EntityKind::Role, ChangeKind::Delete);
        assert_eq!(action.to_string(), "role_delete");
        let action = ActionKind::new(EntityKind::Space, ChangeKind::Update);
        assert_eq!(action.to_string(), "space_update");
    }

    #[test]
    fn test_change_kind_derivation() {
        let role = EntityState::Role(RoleState::new("r1", "Mods"));
        assert_eq!(
            ChangeEvent::created("s1", role.clone()).change_kind(),
            Some(ChangeKind::Create)
        );
        assert_eq!(
            ChangeEvent::updated("s1", role.clone(), role.clone()).change_kind(),
            Some(ChangeKind::Update)
        );
        let deleted = ChangeEvent::deleted("s1", role);
        assert_eq!(deleted.change_kind(), Some(ChangeKind::Delete));
        assert_eq!(deleted.entity_id, "r1");
        assert_eq!(deleted.entity_kind, EntityKind::Role);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::High.is_violation());
        assert!(Severity::Critical.is_violation());
        assert!(!Severity::Medium.is_violation());
        assert_eq!(Severity::Medium.elevated(), Severity::High);
        assert_eq!(Severity::Critical.elevated(), Severity::Critical);
    }

    #[test]
    fn test_violation_serialization() {
        let mut violation = Violation::new(
            "s1",
            "u1",
            ViolationType::RoleDeleteBlocked,
            Severity::High,
            "Role 'Mods' deleted",
        )
        .with_target("r1");
        violation
            .actions_taken
            .push(ActionOutcome::failed(GuardAction::Ban, "missing permission"));

        let json = serde_json::to_string(&violation).unwrap();
        assert!(json.contains("\"violationType\":\"role_delete_blocked\""));
        assert!(json.contains("\"severity\":\"high\""));
        assert!(json.contains("\"actionsTaken\""));
        assert!(!json.contains("snapshotHint"));
        assert!(violation.id.starts_with("vio-"));

        let parsed: Violation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.target_id.as_deref(), Some("r1"));
        assert!(!parsed.actions_taken[0].ok);
    }

    #[test]
    fn test_whitelist_entry_effective() {
        let now = Utc::now();
        let entry = WhitelistEntry::new("s1", WhitelistKind::User, "u1", "admin");
        assert!(entry.is_effective(now));

        let expired = entry.clone().expiring_at(now - chrono::Duration::seconds(1));
        assert!(!expired.is_effective(now));

        let mut inactive = entry.clone();
        inactive.active = false;
        assert!(!inactive.is_effective(now));

        assert!(entry.matches("s1", WhitelistKind::User, "u1"));
        assert!(!entry.matches("s1", WhitelistKind::Role, "u1"));
    }

    #[test]
    fn test_whitelist_entry_defaults_active() {
        let json = r#"{"spaceId":"s1","kind":"action","targetId":"role_delete","addedBy":"admin"}"#;
        let entry: WhitelistEntry = serde_json::from_str(json).unwrap();
        assert!(entry.active);
        assert_eq!(entry.kind, WhitelistKind::Action);
        assert!(entry.reason.is_empty());
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = Snapshot::new("snap-1", "s1", Utc::now())
            .with_entity(EntityState::Role(RoleState::new("r1", "Mods")))
            .with_role_members("r1", ["u1", "u2"]);

        assert!(snapshot.find("r1").is_some());
        assert!(snapshot.find("r2").is_none());
        assert_eq!(snapshot.entities_of(EntityKind::Role).count(), 1);
        assert_eq!(snapshot.role_members["r1"].len(), 2);
        assert_eq!(snapshot.info().id, "snap-1");
    }
}
