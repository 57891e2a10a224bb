//! In-memory backends for development and testing
//!
//! Every collaborator trait has an in-memory implementation here. State is
//! lost on drop; the platform backend additionally records each call so
//! tests can assert on exactly what the engine did.

mod audit;
mod platform;
mod snapshot;
mod source;
mod stores;

pub use audit::MemoryAuditTrail;
pub use platform::{MemoryPlatform, PlatformCall};
pub use snapshot::MemorySnapshotStore;
pub use source::{EventSender, MemoryEventSource};
pub use stores::{
    MemoryConfigStore, MemoryCounterStore, MemoryNotificationSink, MemorySearchIndex,
    MemoryViolationStore, MemoryWhitelistStore,
};

use crate::engine::GuardServices;
use std::sync::Arc;

/// One of every in-memory backend, sharing a single platform identity
#[derive(Clone)]
pub struct MemoryBackends {
    pub audit: Arc<MemoryAuditTrail>,
    pub snapshots: Arc<MemorySnapshotStore>,
    pub whitelist: Arc<MemoryWhitelistStore>,
    pub counters: Arc<MemoryCounterStore>,
    pub platform: Arc<MemoryPlatform>,
    pub notifications: Arc<MemoryNotificationSink>,
    pub violations: Arc<MemoryViolationStore>,
    pub search: Arc<MemorySearchIndex>,
    pub configs: Arc<MemoryConfigStore>,
}

impl MemoryBackends {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            audit: Arc::new(MemoryAuditTrail::new()),
            snapshots: Arc::new(MemorySnapshotStore::new()),
            whitelist: Arc::new(MemoryWhitelistStore::new()),
            counters: Arc::new(MemoryCounterStore::new()),
            platform: Arc::new(MemoryPlatform::new(self_id)),
            notifications: Arc::new(MemoryNotificationSink::new()),
            violations: Arc::new(MemoryViolationStore::default()),
            search: Arc::new(MemorySearchIndex::new()),
            configs: Arc::new(MemoryConfigStore::new()),
        }
    }

    /// Engine wiring backed by these stores
    pub fn services(&self) -> GuardServices {
        GuardServices {
            audit: self.audit.clone(),
            snapshots: self.snapshots.clone(),
            whitelist: self.whitelist.clone(),
            counters: self.counters.clone(),
            platform: self.platform.clone(),
            notifications: self.notifications.clone(),
            violations: self.violations.clone(),
            search: self.search.clone(),
            configs: self.configs.clone(),
        }
    }
}
