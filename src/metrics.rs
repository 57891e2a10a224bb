//! Engine metrics
//!
//! Lock-free counters updated on the hot path; `snapshot()` gives a
//! serializable point-in-time copy and `reset()` zeroes everything.

use crate::types::DropReason;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct GuardMetrics {
    events_received: AtomicU64,
    dropped_self_action: AtomicU64,
    dropped_config: AtomicU64,
    dropped_unclassified: AtomicU64,
    dropped_attribution: AtomicU64,
    dropped_own_action: AtomicU64,
    dropped_whitelisted: AtomicU64,
    dropped_no_change: AtomicU64,
    dropped_restore_in_progress: AtomicU64,
    scheduled: AtomicU64,
    violations: AtomicU64,
    actions_ok: AtomicU64,
    actions_failed: AtomicU64,
    restores_ok: AtomicU64,
    restores_failed: AtomicU64,
    members_synced: AtomicU64,
    persist_failures: AtomicU64,
}

/// Point-in-time copy of [`GuardMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub dropped_self_action: u64,
    pub dropped_config: u64,
    pub dropped_unclassified: u64,
    pub dropped_attribution: u64,
    pub dropped_own_action: u64,
    pub dropped_whitelisted: u64,
    pub dropped_no_change: u64,
    pub dropped_restore_in_progress: u64,
    pub scheduled: u64,
    pub violations: u64,
    pub actions_ok: u64,
    pub actions_failed: u64,
    pub restores_ok: u64,
    pub restores_failed: u64,
    pub members_synced: u64,
    pub persist_failures: u64,
}

impl MetricsSnapshot {
    /// Events that left the pipeline at any gate
    pub fn total_dropped(&self) -> u64 {
        self.dropped_self_action
            + self.dropped_config
            + self.dropped_unclassified
            + self.dropped_attribution
            + self.dropped_own_action
            + self.dropped_whitelisted
            + self.dropped_no_change
            + self.dropped_restore_in_progress
    }
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl GuardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        bump(&self.events_received, 1);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::SelfAction => &self.dropped_self_action,
            DropReason::ConfigurationMissing | DropReason::Disabled => &self.dropped_config,
            DropReason::Unclassified => &self.dropped_unclassified,
            DropReason::AttributionUnavailable => &self.dropped_attribution,
            DropReason::OwnAction => &self.dropped_own_action,
            DropReason::Whitelisted => &self.dropped_whitelisted,
            DropReason::NoChange => &self.dropped_no_change,
            DropReason::RestoreInProgress => &self.dropped_restore_in_progress,
        };
        bump(counter, 1);
    }

    pub fn record_scheduled(&self) {
        bump(&self.scheduled, 1);
    }

    pub fn record_violation(&self) {
        bump(&self.violations, 1);
    }

    pub fn record_action(&self, ok: bool) {
        bump(if ok { &self.actions_ok } else { &self.actions_failed }, 1);
    }

    pub fn record_restore(&self, ok: bool) {
        bump(if ok { &self.restores_ok } else { &self.restores_failed }, 1);
    }

    pub fn record_members_synced(&self, n: usize) {
        bump(&self.members_synced, n as u64);
    }

    pub fn record_persist_failure(&self) {
        bump(&self.persist_failures, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: read(&self.events_received),
            dropped_self_action: read(&self.dropped_self_action),
            dropped_config: read(&self.dropped_config),
            dropped_unclassified: read(&self.dropped_unclassified),
            dropped_attribution: read(&self.dropped_attribution),
            dropped_own_action: read(&self.dropped_own_action),
            dropped_whitelisted: read(&self.dropped_whitelisted),
            dropped_no_change: read(&self.dropped_no_change),
            dropped_restore_in_progress: read(&self.dropped_restore_in_progress),
            scheduled: read(&self.scheduled),
            violations: read(&self.violations),
            actions_ok: read(&self.actions_ok),
            actions_failed: read(&self.actions_failed),
            restores_ok: read(&self.restores_ok),
            restores_failed: read(&self.restores_failed),
            members_synced: read(&self.members_synced),
            persist_failures: read(&self.persist_failures),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.events_received,
            &self.dropped_self_action,
            &self.dropped_config,
            &self.dropped_unclassified,
            &self.dropped_attribution,
            &self.dropped_own_action,
            &self.dropped_whitelisted,
            &self.dropped_no_change,
            &self.dropped_restore_in_progress,
            &self.scheduled,
            &self.violations,
            &self.actions_ok,
            &self.actions_failed,
            &self.restores_ok,
            &self.restores_failed,
            &self.members_synced,
            &self.persist_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
