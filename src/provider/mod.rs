//! External collaborator traits
//!
//! The engine talks to the outside world only through these traits:
//! where change events come from, who made a change, what the space looked
//! like at capture time, what the platform lets us mutate, and where
//! results go. Backends (in-memory, NATS, or a platform SDK) implement them
//! without the engine changing.

use crate::config::GuardConfig;
use crate::entity::{EntityState, VerificationLevel};
use crate::error::Result;
use crate::types::{
    ActionKind, AuditAttribution, ChangeEvent, EntityKind, Notification, SnapshotInfo, Violation,
    WhitelistEntry, WhitelistKind,
};
use async_trait::async_trait;
use std::time::Duration;

pub mod file;
pub mod memory;
pub mod nats;

/// Async stream of change notifications (at-least-once, may duplicate)
#[async_trait]
pub trait EventSource: Send {
    /// Receive the next change; `None` when the source is closed
    async fn next(&mut self) -> Result<Option<ChangeEvent>>;
}

/// Eventually-consistent audit trail reader
#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Most recent audit entry for an action in a space, if any has landed
    async fn lookup(&self, space_id: &str, action: ActionKind) -> Result<Option<AuditAttribution>>;
}

/// Read-only access to captured snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Newest snapshot of a space
    async fn latest(&self, space_id: &str) -> Result<Option<SnapshotInfo>>;

    /// One entity from a snapshot
    async fn get(
        &self,
        snapshot_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<EntityState>>;

    /// Up to `limit` snapshots of a space, newest first
    async fn recent(&self, space_id: &str, limit: usize) -> Result<Vec<SnapshotInfo>>;

    /// Members recorded as holding a role
    async fn members_holding_role(&self, snapshot_id: &str, role_id: &str) -> Result<Vec<String>>;

    /// Entities whose parent reference is `parent_id`
    async fn children_of(&self, snapshot_id: &str, parent_id: &str) -> Result<Vec<EntityState>>;

    /// Every recorded entity of one kind
    async fn entities(&self, snapshot_id: &str, kind: EntityKind) -> Result<Vec<EntityState>>;
}

/// Persisted whitelist; written by the administrative layer
#[async_trait]
pub trait WhitelistStore: Send + Sync {
    /// Insert or replace the entry for (space, kind, target)
    async fn add(&self, entry: WhitelistEntry) -> Result<()>;

    /// Remove an entry; true if one existed
    async fn remove(&self, space_id: &str, kind: WhitelistKind, target_id: &str) -> Result<bool>;

    /// All entries for a space
    async fn list(&self, space_id: &str) -> Result<Vec<WhitelistEntry>>;

    /// True when an active, unexpired entry matches
    async fn is_active(&self, space_id: &str, kind: WhitelistKind, target_id: &str) -> Result<bool>;
}

/// Shared TTL counters
///
/// `increment_and_get` sets the key to 1 with `ttl` when absent, otherwise
/// increments while preserving the existing TTL.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<u64>;

    async fn get(&self, key: &str) -> Result<u64>;
}

/// Platform mutation API
///
/// Every call may fail with permission or rate-limit errors; the engine
/// treats those as ordinary per-item failures.
#[async_trait]
pub trait Platform: Send + Sync {
    /// The engine's own member id on the platform
    fn self_id(&self) -> &str;

    /// Current live state of an entity
    async fn fetch(
        &self,
        space_id: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<EntityState>>;

    /// Create an entity from a state template; returns the new id
    async fn create(&self, space_id: &str, state: &EntityState) -> Result<String>;

    /// Overwrite an existing entity's tracked fields
    async fn edit(&self, space_id: &str, entity_id: &str, state: &EntityState) -> Result<()>;

    async fn delete(
        &self,
        space_id: &str,
        kind: EntityKind,
        entity_id: &str,
        reason: &str,
    ) -> Result<()>;

    /// Roles a member currently holds
    async fn member_roles(&self, space_id: &str, user_id: &str) -> Result<Vec<String>>;

    /// Members currently holding a role
    async fn role_members(&self, space_id: &str, role_id: &str) -> Result<Vec<String>>;

    async fn grant_role(&self, space_id: &str, user_id: &str, role_id: &str) -> Result<()>;

    async fn revoke_role(&self, space_id: &str, user_id: &str, role_id: &str) -> Result<()>;

    async fn kick(&self, space_id: &str, user_id: &str, reason: &str) -> Result<()>;

    async fn ban(&self, space_id: &str, user_id: &str, reason: &str) -> Result<()>;

    async fn timeout(
        &self,
        space_id: &str,
        user_id: &str,
        duration: Duration,
        reason: &str,
    ) -> Result<()>;

    async fn set_verification_level(&self, space_id: &str, level: VerificationLevel) -> Result<()>;
}

/// Destination for violation and restore summaries
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, channel_id: &str, notification: &Notification) -> Result<()>;
}

/// Durable, append-only violation storage
#[async_trait]
pub trait ViolationStore: Send + Sync {
    async fn record(&self, violation: &Violation) -> Result<()>;

    /// Most recent violations for a space, newest first
    async fn list(&self, space_id: &str, limit: usize) -> Result<Vec<Violation>>;
}

/// Search index fed with every violation
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index(&self, violation: &Violation) -> Result<()>;
}

/// Per-space guard policy lookup
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn guard_config(&self, space_id: &str) -> Result<Option<GuardConfig>>;
}
