use crate::config::GuardConfig;
use crate::error::Result;
use crate::expiry::ExpiryMap;
use crate::provider::{
    ConfigStore, CounterStore, NotificationSink, SearchIndex, ViolationStore, WhitelistStore,
};
use crate::types::{Notification, Violation, WhitelistEntry, WhitelistKind};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory whitelist
#[derive(Default)]
pub struct MemoryWhitelistStore {
    entries: RwLock<Vec<WhitelistEntry>>,
}

impl MemoryWhitelistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WhitelistStore for MemoryWhitelistStore {
    async fn add(&self, entry: WhitelistEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|e| !e.matches(&entry.space_id, entry.kind, &entry.target_id));
        entries.push(entry);
        Ok(())
    }

    async fn remove(&self, space_id: &str, kind: WhitelistKind, target_id: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !e.matches(space_id, kind, target_id));
        Ok(entries.len() != before)
    }

    async fn list(&self, space_id: &str) -> Result<Vec<WhitelistEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.space_id == space_id)
            .cloned()
            .collect())
    }

    async fn is_active(&self, space_id: &str, kind: WhitelistKind, target_id: &str) -> Result<bool> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .any(|e| e.matches(space_id, kind, target_id) && e.is_effective(now)))
    }
}

/// In-memory TTL counters
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: ExpiryMap<String, u64>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_and_get(&self, key: &str, ttl: Duration) -> Result<u64> {
        Ok(self
            .counters
            .upsert(key.to_string(), ttl, |v| v.copied().unwrap_or(0) + 1))
    }

    async fn get(&self, key: &str) -> Result<u64> {
        Ok(self.counters.get(&key.to_string()).unwrap_or(0))
    }
}

/// Records every notification it is handed
#[derive(Default)]
pub struct MemoryNotificationSink {
    sent: RwLock<Vec<(String, Notification)>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// (channel id, notification) pairs in send order
    pub async fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn notify(&self, channel_id: &str, notification: &Notification) -> Result<()> {
        self.sent
            .write()
            .await
            .push((channel_id.to_string(), notification.clone()));
        Ok(())
    }
}

/// Append-only violation log with a capacity bound
pub struct MemoryViolationStore {
    violations: RwLock<Vec<Violation>>,
    max_violations: usize,
}

impl MemoryViolationStore {
    /// Create a store keeping at most `max_violations` entries (0 = unbounded)
    pub fn new(max_violations: usize) -> Self {
        Self {
            violations: RwLock::new(Vec::new()),
            max_violations,
        }
    }

    pub async fn count(&self) -> usize {
        self.violations.read().await.len()
    }

    /// Every stored violation, oldest first
    pub async fn all(&self) -> Vec<Violation> {
        self.violations.read().await.clone()
    }
}

impl Default for MemoryViolationStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl ViolationStore for MemoryViolationStore {
    async fn record(&self, violation: &Violation) -> Result<()> {
        let mut violations = self.violations.write().await;
        violations.push(violation.clone());

        // Enforce max capacity
        if self.max_violations > 0 && violations.len() > self.max_violations {
            let drain_count = violations.len() - self.max_violations;
            violations.drain(..drain_count);
        }
        Ok(())
    }

    async fn list(&self, space_id: &str, limit: usize) -> Result<Vec<Violation>> {
        let violations = self.violations.read().await;
        Ok(violations
            .iter()
            .rev()
            .filter(|v| v.space_id == space_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Naive substring search over indexed violations
#[derive(Default)]
pub struct MemorySearchIndex {
    documents: RwLock<Vec<Violation>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Violations in a space whose description, actor or type contains `term`
    pub async fn search(&self, space_id: &str, term: &str) -> Vec<Violation> {
        let term = term.to_lowercase();
        self.documents
            .read()
            .await
            .iter()
            .filter(|v| v.space_id == space_id)
            .filter(|v| {
                v.description.to_lowercase().contains(&term)
                    || v.actor_id.to_lowercase().contains(&term)
                    || v.violation_type.as_str().contains(term.as_str())
            })
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn index(&self, violation: &Violation) -> Result<()> {
        self.documents.write().await.push(violation.clone());
        Ok(())
    }
}

/// Mutable per-space policy map
#[derive(Default)]
pub struct MemoryConfigStore {
    configs: RwLock<HashMap<String, GuardConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, space_id: &str, config: GuardConfig) {
        self.configs
            .write()
            .await
            .insert(space_id.to_string(), config);
    }

    pub async fn remove(&self, space_id: &str) -> Option<GuardConfig> {
        self.configs.write().await.remove(space_id)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn guard_config(&self, space_id: &str) -> Result<Option<GuardConfig>> {
        Ok(self.configs.read().await.get(space_id).cloned())
    }
}
