//! Violation policy: the per-kind rule table and classification
//!
//! Every (entity kind, change kind) pair the engine handles has exactly one
//! [`Rule`]. The rule decides the violation type and severity, what happens
//! when the audit trail cannot attribute the change, and which remediation
//! the `restore` action performs. Pairs without a rule are unclassified and
//! dropped.

use crate::config::{GuardConfig, RateLimit};
use crate::entity::EntityState;
use crate::permissions::Permissions;
use crate::types::{ActionKind, ChangeEvent, ChangeKind, EntityKind, Severity, ViolationType};

/// Behavior when no fresh audit entry is available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionFallback {
    /// Continue with the executor recorded as unknown
    ProceedUnknown,
    /// Leave the pipeline
    Drop,
}

/// What the `restore` action does for a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Delete the entity that was created
    Remove,
    /// Edit the entity back to its snapshot state
    Revert,
    /// Create the deleted entity again
    Recreate,
    /// Audit only
    None,
}

/// Creation threshold that reclassifies a violation when exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub violation_type: ViolationType,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub attribution: AttributionFallback,
    pub remediation: Remediation,
    pub rate_limited: Option<RateRule>,
}

const fn rule(
    violation_type: ViolationType,
    severity: Severity,
    attribution: AttributionFallback,
    remediation: Remediation,
) -> Rule {
    Rule {
        violation_type,
        severity,
        attribution,
        remediation,
        rate_limited: None,
    }
}

/// Rule for an action, or `None` when the action is unclassified
pub fn rule_for(action: ActionKind) -> Option<Rule> {
    use AttributionFallback::{Drop, ProceedUnknown};
    use ChangeKind::{Create, Delete, Update};
    use EntityKind as E;
    use ViolationType as V;

    let rule = match (action.entity, action.change) {
        (E::Role, Create) => rule(V::RoleCreateUnauthorized, Severity::Medium, Drop, Remediation::Remove),
        (E::Role, Update) => rule(V::RoleUpdateUnauthorized, Severity::Medium, ProceedUnknown, Remediation::Revert),
        (E::Role, Delete) => rule(V::RoleDeleteBlocked, Severity::High, ProceedUnknown, Remediation::Recreate),

        (E::Channel, Create) => rule(V::ChannelCreateUnauthorized, Severity::Medium, Drop, Remediation::Remove),
        (E::Channel, Update) => rule(V::ChannelUpdateUnauthorized, Severity::Medium, ProceedUnknown, Remediation::Revert),
        (E::Channel, Delete) => rule(V::ChannelDeleteBlocked, Severity::High, ProceedUnknown, Remediation::Recreate),

        (E::Emoji, Create) => rule(V::EmojiCreateUnauthorized, Severity::Medium, Drop, Remediation::Remove),
        (E::Emoji, Update) => rule(V::EmojiUpdateUnauthorized, Severity::Medium, Drop, Remediation::Revert),
        (E::Emoji, Delete) => rule(V::EmojiDeleteBlocked, Severity::High, ProceedUnknown, Remediation::Recreate),

        (E::Sticker, Create) => rule(V::StickerCreateUnauthorized, Severity::Medium, Drop, Remediation::Remove),
        (E::Sticker, Update) => rule(V::StickerUpdateUnauthorized, Severity::Medium, Drop, Remediation::Revert),
        (E::Sticker, Delete) => rule(V::StickerDeleteBlocked, Severity::High, ProceedUnknown, Remediation::Recreate),

        (E::Webhook, Create) => Rule {
            rate_limited: Some(RateRule {
                violation_type: V::WebhookLimitExceeded,
                severity: Severity::Critical,
            }),
            ..rule(V::WebhookCreateUnauthorized, Severity::Medium, Drop, Remediation::Remove)
        },
        (E::Webhook, Update) => rule(V::WebhookUpdateUnauthorized, Severity::Medium, Drop, Remediation::Revert),
        (E::Webhook, Delete) => rule(V::WebhookDeleteBlocked, Severity::High, ProceedUnknown, Remediation::Recreate),

        (E::Invite, Create) => Rule {
            rate_limited: Some(RateRule {
                violation_type: V::InviteLimitExceeded,
                severity: Severity::High,
            }),
            ..rule(V::InviteCreateUnauthorized, Severity::Medium, Drop, Remediation::Remove)
        },
        (E::Invite, Delete) => rule(V::InviteDeleteLogged, Severity::Low, Drop, Remediation::None),

        (E::Space, Update) => rule(V::SpaceUpdateBlocked, Severity::High, ProceedUnknown, Remediation::Revert),

        (E::Invite, Update) | (E::Space, Create) | (E::Space, Delete) => return None,
    };
    Some(rule)
}

/// Violation type and severity settled for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub remediation: Remediation,
}

impl Rule {
    /// Base classification, before any rate-limit reclassification
    pub fn classify(&self, event: &ChangeEvent) -> Classification {
        if escalates_privileges(event) {
            return Classification {
                violation_type: ViolationType::RolePermissionEscalation,
                severity: Severity::Critical,
                remediation: self.remediation,
            };
        }
        Classification {
            violation_type: self.violation_type,
            severity: self.severity,
            remediation: self.remediation,
        }
    }

    /// Reclassify after the creation counter crossed its threshold
    pub fn over_limit(&self, base: Classification) -> Classification {
        match self.rate_limited {
            Some(rate) => Classification {
                violation_type: rate.violation_type,
                severity: rate.severity.max(base.severity.elevated()),
                remediation: base.remediation,
            },
            None => base,
        }
    }
}

/// The space's threshold for a rate-limited action
pub fn rate_limit_for(config: &GuardConfig, action: ActionKind) -> Option<RateLimit> {
    match (action.entity, action.change) {
        (EntityKind::Invite, ChangeKind::Create) => Some(config.limits.invite_create),
        (EntityKind::Webhook, ChangeKind::Create) => Some(config.limits.webhook_create),
        _ => None,
    }
}

/// A role update that grants administrator
pub fn escalates_privileges(event: &ChangeEvent) -> bool {
    match (&event.before, &event.after) {
        (Some(EntityState::Role(before)), Some(EntityState::Role(after))) => after
            .permissions
            .gained_since(before.permissions)
            .contains(Permissions::ADMINISTRATOR),
        _ => false,
    }
}

/// One-line human description of a classified change
pub fn describe(event: &ChangeEvent, actor_id: &str, changed_fields: &[&str]) -> String {
    let name = event
        .latest_state()
        .map(|s| s.display_name().to_string())
        .unwrap_or_else(|| event.entity_id.clone());
    let verb = match event.change_kind() {
        Some(ChangeKind::Create) => "created",
        Some(ChangeKind::Update) => "updated",
        Some(ChangeKind::Delete) => "deleted",
        None => "changed",
    };
    let mut text = format!("{} '{}' {} by {}", event.entity_kind, name, verb, actor_id);
    if !changed_fields.is_empty() {
        text.push_str(&format!(" ({})", changed_fields.join(", ")));
    }
    text
}
