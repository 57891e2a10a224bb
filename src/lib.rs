//! # a3s-guard
//!
//! Real-time structural change guard for A3S community spaces.
//!
//! ## Overview
//!
//! `a3s-guard` watches create/update/delete notifications for a space's
//! roles, channels, emojis, stickers, webhooks, invites and settings. Each
//! change is attributed through the audit trail, checked against the
//! whitelist, debounced, classified into a violation and acted on. Deleted
//! or altered entities are restored from the most recent snapshot that has
//! them, and recreated roles are re-granted to their recorded members.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_guard::provider::memory::MemoryBackends;
//! use a3s_guard::{ChangeEvent, EngineSettings, GuardConfig, GuardEngine};
//! use a3s_guard::entity::{EntityState, RoleState};
//!
//! # async fn example() -> a3s_guard::Result<()> {
//! let backends = MemoryBackends::new("guard-bot");
//! backends.configs.set("space-1", GuardConfig::default()).await;
//!
//! let engine = GuardEngine::new(backends.services(), EngineSettings::default())?;
//! let role = EntityState::Role(RoleState::new("r1", "Moderators"));
//! let disposition = engine.handle_event(ChangeEvent::deleted("space-1", role)).await;
//! println!("{:?}", disposition);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: in-memory backends for every collaborator, for tests and single-process use
//! - **nats**: JetStream change source and NATS notification sink
//! - **file**: JSON-file whitelist store
//!
//! ## Architecture
//!
//! - **GuardEngine**: gate pipeline, debounce, action execution, persistence
//! - **RestoreOrchestrator**: snapshot fallback, parent-first restore, id remapping
//! - **MembershipSyncer**: batched, rate-limited role re-grants
//! - **provider** traits: the only seams to the outside world

pub mod config;
pub mod counter;
pub mod debounce;
pub mod engine;
pub mod entity;
pub mod error;
pub mod expiry;
pub mod metrics;
pub mod permissions;
pub mod policy;
pub mod provider;
pub mod restore;
pub mod suppress;
pub mod sync;
pub mod types;
pub mod whitelist;

// Re-export core types
pub use config::{EngineSettings, GuardConfig, GuardSettings, RateLimit, SyncSettings};
pub use engine::{GuardEngine, GuardServices};
pub use entity::{EntityState, Guardable};
pub use error::{GuardError, Result};
pub use metrics::{GuardMetrics, MetricsSnapshot};
pub use permissions::Permissions;
pub use provider::{
    AuditTrail, ConfigStore, CounterStore, EventSource, NotificationSink, Platform, SearchIndex,
    SnapshotStore, ViolationStore, WhitelistStore,
};
pub use restore::{RestoreOutcome, RestoreReport, RestoreRequest, SnapshotRestoreReport};
pub use sync::SyncReport;
pub use types::{
    ActionKind, ActionOutcome, AuditAttribution, ChangeEvent, ChangeKind, Disposition, DropReason,
    EntityKind, GuardAction, Notification, Severity, Snapshot, SnapshotInfo, Violation,
    ViolationType, WhitelistEntry, WhitelistKind,
};

// Re-export providers for convenience
pub use provider::file::FileWhitelistStore;
pub use provider::memory::MemoryBackends;
pub use provider::nats::{NatsClient, NatsConfig, NatsEventSource, NatsNotificationSink};
