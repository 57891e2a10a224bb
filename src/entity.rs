//! Guardable entity states
//!
//! Every structural entity the engine protects implements [`Guardable`]:
//! a stable id, an optional parent reference, and the set of tracked
//! fields used for change detection and restore idempotence. The
//! [`EntityState`] enum is the one polymorphic carrier the pipeline,
//! the snapshot store and the platform all exchange.

use crate::permissions::Permissions;
use crate::types::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Tracked field name → canonical value
pub type FieldMap = BTreeMap<&'static str, Value>;

/// Capability shared by every protected entity
pub trait Guardable {
    /// Platform id of the entity
    fn id(&self) -> &str;

    /// Kind used for rule lookup and snapshot addressing
    fn kind(&self) -> EntityKind;

    /// Entity that must exist before this one can be created
    fn parent_ref(&self) -> Option<&str> {
        None
    }

    /// Fields compared for change detection and restore idempotence
    fn diffable_fields(&self) -> FieldMap;

    /// Names of tracked fields whose values differ from `other`
    fn changed_fields(&self, other: &dyn Guardable) -> Vec<&'static str> {
        let mine = self.diffable_fields();
        let theirs = other.diffable_fields();
        let keys: BTreeSet<&'static str> = mine.keys().chain(theirs.keys()).copied().collect();
        keys.into_iter()
            .filter(|k| mine.get(k) != theirs.get(k))
            .collect()
    }

    /// True when every tracked field matches `other`
    fn same_fields(&self, other: &dyn Guardable) -> bool {
        self.diffable_fields() == other.diffable_fields()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleState {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub mentionable: bool,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub position: i32,
    /// Integration-managed roles cannot be recreated by the engine
    #[serde(default)]
    pub managed: bool,
}

impl RoleState {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: 0,
            hoist: false,
            mentionable: false,
            permissions: Permissions::empty(),
            position: 0,
            managed: false,
        }
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }
}

impl Guardable for RoleState {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Role
    }

    fn diffable_fields(&self) -> FieldMap {
        BTreeMap::from([
            ("name", json!(self.name)),
            ("color", json!(self.color)),
            ("hoist", json!(self.hoist)),
            ("mentionable", json!(self.mentionable)),
            ("permissions", json!(self.permissions.bits())),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Text,
    Voice,
    Category,
    Announcement,
    Stage,
    Forum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteTarget {
    Role,
    Member,
}

/// Per-channel permission override for a role or member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOverwrite {
    pub id: String,
    pub target: OverwriteTarget,
    #[serde(default)]
    pub allow: Permissions,
    #[serde(default)]
    pub deny: Permissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub id: String,
    pub name: String,
    pub channel_type: ChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub rate_limit_per_user: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_limit: Option<u32>,
    #[serde(default)]
    pub overwrites: Vec<PermissionOverwrite>,
}

impl ChannelState {
    pub fn text(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, ChannelType::Text)
    }

    pub fn category(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, ChannelType::Category)
    }

    pub fn new(id: impl Into<String>, name: impl Into<String>, channel_type: ChannelType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            channel_type,
            parent_id: None,
            position: 0,
            topic: None,
            nsfw: false,
            rate_limit_per_user: 0,
            bitrate: None,
            user_limit: None,
            overwrites: Vec::new(),
        }
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn is_category(&self) -> bool {
        self.channel_type == ChannelType::Category
    }
}

impl Guardable for ChannelState {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Channel
    }

    fn parent_ref(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn diffable_fields(&self) -> FieldMap {
        let mut overwrites: Vec<Value> = self
            .overwrites
            .iter()
            .map(|o| json!([o.id, o.allow.bits(), o.deny.bits()]))
            .collect();
        overwrites.sort_by_key(|v| v.to_string());

        BTreeMap::from([
            ("name", json!(self.name)),
            ("channelType", json!(self.channel_type)),
            ("parentId", json!(self.parent_id)),
            ("topic", json!(self.topic)),
            ("nsfw", json!(self.nsfw)),
            ("rateLimitPerUser", json!(self.rate_limit_per_user)),
            ("bitrate", json!(self.bitrate)),
            ("userLimit", json!(self.user_limit)),
            ("overwrites", Value::Array(overwrites)),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiState {
    pub id: String,
    pub name: String,
    /// Source image the emoji can be re-uploaded from
    pub image_url: String,
    #[serde(default)]
    pub animated: bool,
    /// Roles allowed to use the emoji; empty means everyone
    #[serde(default)]
    pub roles: Vec<String>,
}

impl EmojiState {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_url: image_url.into(),
            animated: false,
            roles: Vec::new(),
        }
    }
}

impl Guardable for EmojiState {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Emoji
    }

    fn diffable_fields(&self) -> FieldMap {
        let mut roles = self.roles.clone();
        roles.sort();
        BTreeMap::from([("name", json!(self.name)), ("roles", json!(roles))])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerState {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: String,
    pub image_url: String,
}

impl StickerState {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            tags: String::new(),
            image_url: image_url.into(),
        }
    }
}

impl Guardable for StickerState {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Sticker
    }

    fn diffable_fields(&self) -> FieldMap {
        BTreeMap::from([
            ("name", json!(self.name)),
            ("description", json!(self.description)),
            ("tags", json!(self.tags)),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookState {
    pub id: String,
    pub name: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl WebhookState {
    pub fn new(id: impl Into<String>, name: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            channel_id: channel_id.into(),
            avatar_url: None,
        }
    }
}

impl Guardable for WebhookState {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Webhook
    }

    fn parent_ref(&self) -> Option<&str> {
        Some(&self.channel_id)
    }

    fn diffable_fields(&self) -> FieldMap {
        BTreeMap::from([
            ("name", json!(self.name)),
            ("channelId", json!(self.channel_id)),
            ("avatarUrl", json!(self.avatar_url)),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteState {
    /// Invite code, used as the entity id
    pub code: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inviter_id: Option<String>,
    #[serde(default)]
    pub max_uses: u32,
    #[serde(default)]
    pub max_age_secs: u64,
    #[serde(default)]
    pub temporary: bool,
}

impl InviteState {
    pub fn new(code: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            channel_id: channel_id.into(),
            inviter_id: None,
            max_uses: 0,
            max_age_secs: 0,
            temporary: false,
        }
    }
}

impl Guardable for InviteState {
    fn id(&self) -> &str {
        &self.code
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Invite
    }

    fn parent_ref(&self) -> Option<&str> {
        Some(&self.channel_id)
    }

    fn diffable_fields(&self) -> FieldMap {
        BTreeMap::from([
            ("channelId", json!(self.channel_id)),
            ("maxUses", json!(self.max_uses)),
            ("maxAgeSecs", json!(self.max_age_secs)),
            ("temporary", json!(self.temporary)),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Highest,
}

/// Space-level settings; the id is the space id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSettings {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub verification_level: VerificationLevel,
    #[serde(default)]
    pub explicit_content_filter: u8,
    #[serde(default)]
    pub default_notifications: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub afk_channel_id: Option<String>,
    #[serde(default)]
    pub afk_timeout_secs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_channel_id: Option<String>,
}

impl SpaceSettings {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon_url: None,
            verification_level: VerificationLevel::None,
            explicit_content_filter: 0,
            default_notifications: 0,
            afk_channel_id: None,
            afk_timeout_secs: 300,
            system_channel_id: None,
            rules_channel_id: None,
        }
    }

    /// Channel references the settings hold, for id remapping
    pub fn channel_refs_mut(&mut self) -> [&mut Option<String>; 3] {
        [
            &mut self.afk_channel_id,
            &mut self.system_channel_id,
            &mut self.rules_channel_id,
        ]
    }
}

impl Guardable for SpaceSettings {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Space
    }

    fn diffable_fields(&self) -> FieldMap {
        BTreeMap::from([
            ("name", json!(self.name)),
            ("iconUrl", json!(self.icon_url)),
            ("verificationLevel", json!(self.verification_level)),
            ("explicitContentFilter", json!(self.explicit_content_filter)),
            ("defaultNotifications", json!(self.default_notifications)),
            ("afkChannelId", json!(self.afk_channel_id)),
            ("afkTimeoutSecs", json!(self.afk_timeout_secs)),
            ("systemChannelId", json!(self.system_channel_id)),
            ("rulesChannelId", json!(self.rules_channel_id)),
        ])
    }
}

/// Polymorphic carrier for every guardable entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EntityState {
    Role(RoleState),
    Channel(ChannelState),
    Emoji(EmojiState),
    Sticker(StickerState),
    Webhook(WebhookState),
    Invite(InviteState),
    Space(SpaceSettings),
}

impl EntityState {
    fn inner(&self) -> &dyn Guardable {
        match self {
            Self::Role(s) => s,
            Self::Channel(s) => s,
            Self::Emoji(s) => s,
            Self::Sticker(s) => s,
            Self::Webhook(s) => s,
            Self::Invite(s) => s,
            Self::Space(s) => s,
        }
    }

    pub fn as_role(&self) -> Option<&RoleState> {
        match self {
            Self::Role(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&ChannelState> {
        match self {
            Self::Channel(s) => Some(s),
            _ => None,
        }
    }

    /// Same state under a different id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        match &mut self {
            Self::Role(s) => s.id = id,
            Self::Channel(s) => s.id = id,
            Self::Emoji(s) => s.id = id,
            Self::Sticker(s) => s.id = id,
            Self::Webhook(s) => s.id = id,
            Self::Invite(s) => s.code = id,
            Self::Space(s) => s.id = id,
        }
        self
    }

    /// Human-readable name for summaries
    pub fn display_name(&self) -> &str {
        match self {
            Self::Role(s) => &s.name,
            Self::Channel(s) => &s.name,
            Self::Emoji(s) => &s.name,
            Self::Sticker(s) => &s.name,
            Self::Webhook(s) => &s.name,
            Self::Invite(s) => &s.code,
            Self::Space(s) => &s.name,
        }
    }
}

impl Guardable for EntityState {
    fn id(&self) -> &str {
        self.inner().id()
    }

    fn kind(&self) -> EntityKind {
        self.inner().kind()
    }

    fn parent_ref(&self) -> Option<&str> {
        self.inner().parent_ref()
    }

    fn diffable_fields(&self) -> FieldMap {
        self.inner().diffable_fields()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_changed_fields() {
        let before = RoleState::new("r1", "Mods").with_color(0xff0000);
        let mut after = before.clone();
        after.permissions = Permissions::ADMINISTRATOR;
        after.name = "Admins".to_string();

        let changed = before.changed_fields(&after);
        assert_eq!(changed, vec!["name", "permissions"]);
        assert!(before.same_fields(&before.clone()));
    }

    #[test]
    fn test_position_not_tracked() {
        let before = RoleState::new("r1", "Mods");
        let mut after = before.clone();
        after.position = 7;
        assert!(before.changed_fields(&after).is_empty());
    }

    #[test]
    fn test_channel_overwrite_order_irrelevant() {
        let a = PermissionOverwrite {
            id: "r1".to_string(),
            target: OverwriteTarget::Role,
            allow: Permissions::VIEW_CHANNEL,
            deny: Permissions::empty(),
        };
        let b = PermissionOverwrite {
            id: "r2".to_string(),
            target: OverwriteTarget::Role,
            allow: Permissions::empty(),
            deny: Permissions::SEND_MESSAGES,
        };
        let mut first = ChannelState::text("c1", "general");
        first.overwrites = vec![a.clone(), b.clone()];
        let mut second = first.clone();
        second.overwrites = vec![b, a];
        assert!(first.same_fields(&second));
    }

    #[test]
    fn test_parent_refs() {
        let channel = EntityState::Channel(ChannelState::text("c1", "general").under("p1"));
        assert_eq!(channel.parent_ref(), Some("p1"));
        assert_eq!(channel.kind(), EntityKind::Channel);

        let webhook = EntityState::Webhook(WebhookState::new("w1", "ci", "c1"));
        assert_eq!(webhook.parent_ref(), Some("c1"));

        let role = EntityState::Role(RoleState::new("r1", "Mods"));
        assert_eq!(role.parent_ref(), None);
    }

    #[test]
    fn test_entity_state_tagged_json() {
        let json = r#"{
            "kind": "role",
            "id": "r1",
            "name": "Mods",
            "permissions": ["KICK_MEMBERS", "BAN_MEMBERS"]
        }"#;
        let state: EntityState = serde_json::from_str(json).unwrap();
        let role = state.as_role().unwrap();
        assert_eq!(role.permissions, Permissions::KICK_MEMBERS | Permissions::BAN_MEMBERS);
        assert_eq!(state.display_name(), "Mods");
    }

    #[test]
    fn test_invite_id_is_code() {
        let invite = EntityState::Invite(InviteState::new("abc123", "c1"));
        assert_eq!(invite.id(), "abc123");
        assert_eq!(invite.kind(), EntityKind::Invite);
    }
}
