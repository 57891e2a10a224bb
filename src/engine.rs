//! Guard engine
//!
//! `GuardEngine` owns the per-event pipeline and every piece of process-local
//! TTL state (self-action markers, restoration locks, debounce timers and the
//! whitelist cache). An event walks the gates in order:
//!
//! ```text
//! RECEIVED → SELF-CHECK → CONFIG → CLASSIFIABLE → ATTRIBUTION → BOT-CHECK
//!          → WHITELIST → CHANGE-DETECTION → LOCK-CHECK → DEBOUNCE
//! ```
//!
//! and exits with a [`Disposition`]. Once the debounce window settles, the
//! fingerprint's last event is classified, acted on, persisted and reported.
//! Per-event handling never returns an error: failures are logged and the
//! event ends dropped or partially acted. The administrative entry points
//! (`restore_entity`, `restore_snapshot`, `resync_role_members`, `lockdown`)
//! propagate errors to their caller.

use crate::config::{EngineSettings, GuardConfig};
use crate::counter::ViolationCounter;
use crate::debounce::{change_digest, Debouncer, Fingerprint};
use crate::entity::{EntityState, Guardable, VerificationLevel};
use crate::error::{GuardError, Result};
use crate::metrics::GuardMetrics;
use crate::permissions::Permissions;
use crate::policy::{self, AttributionFallback, Classification, Remediation, Rule};
use crate::provider::{
    AuditTrail, ConfigStore, CounterStore, EventSource, NotificationSink, Platform, SearchIndex,
    SnapshotStore, ViolationStore, WhitelistStore,
};
use crate::restore::{
    RestoreOrchestrator, RestoreOutcome, RestoreReport, RestoreRequest, SnapshotRestoreReport,
};
use crate::suppress::{RestorationLocks, SelfActionSuppressor};
use crate::sync::SyncReport;
use crate::types::{
    ActionKind, ActionOutcome, ChangeEvent, ChangeKind, Disposition, DropReason, EntityKind,
    GuardAction, Notification, Violation, UNKNOWN_ACTOR,
};
use crate::whitelist::WhitelistAuthority;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::task::JoinHandle;

/// External collaborators the engine is wired to
#[derive(Clone)]
pub struct GuardServices {
    pub audit: Arc<dyn AuditTrail>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub whitelist: Arc<dyn WhitelistStore>,
    pub counters: Arc<dyn CounterStore>,
    pub platform: Arc<dyn Platform>,
    pub notifications: Arc<dyn NotificationSink>,
    pub violations: Arc<dyn ViolationStore>,
    pub search: Arc<dyn SearchIndex>,
    pub configs: Arc<dyn ConfigStore>,
}

/// Everything the debounced classification needs from gate time
struct Pending {
    event: ChangeEvent,
    config: GuardConfig,
    rule: Rule,
    classification: Classification,
    action: ActionKind,
    executor_id: String,
    changed_fields: Vec<&'static str>,
}

struct Inner {
    services: GuardServices,
    settings: EngineSettings,
    suppressor: Arc<SelfActionSuppressor>,
    locks: RestorationLocks,
    debouncer: Debouncer,
    whitelist: WhitelistAuthority,
    counter: ViolationCounter,
    restorer: RestoreOrchestrator,
    metrics: GuardMetrics,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Real-time structural change guard for one or more spaces
#[derive(Clone)]
pub struct GuardEngine {
    inner: Arc<Inner>,
}

impl GuardEngine {
    /// Wire an engine to its collaborators
    pub fn new(services: GuardServices, settings: EngineSettings) -> Result<Self> {
        settings.validate()?;

        let suppressor = Arc::new(SelfActionSuppressor::new(settings.self_action_ttl()));
        let restorer = RestoreOrchestrator::new(
            services.snapshots.clone(),
            services.platform.clone(),
            suppressor.clone(),
            &settings,
        );
        let inner = Inner {
            locks: RestorationLocks::new(settings.restore_lock()),
            debouncer: Debouncer::new(),
            whitelist: WhitelistAuthority::new(
                services.whitelist.clone(),
                settings.whitelist_cache_ttl(),
            ),
            counter: ViolationCounter::new(services.counters.clone(), settings.tally_window()),
            restorer,
            suppressor,
            metrics: GuardMetrics::new(),
            sweeper: Mutex::new(None),
            services,
            settings,
        };

        tracing::info!(
            debounce_ms = inner.settings.debounce_ms,
            self_action_ttl_secs = inner.settings.self_action_ttl_secs,
            max_snapshot_fallback = inner.settings.max_snapshot_fallback,
            "Guard engine created"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn metrics(&self) -> &GuardMetrics {
        &self.inner.metrics
    }

    /// Fingerprints waiting for their debounce window to settle
    pub fn pending_debounces(&self) -> usize {
        self.inner.debouncer.pending()
    }

    /// True while a self-action marker for the target is live
    pub fn is_self_action(&self, space_id: &str, target_id: &str) -> bool {
        self.inner.suppressor.is_self_action(space_id, target_id)
    }

    /// Live id an original entity was recreated under, if remembered
    pub fn live_id(&self, space_id: &str, original_id: &str) -> Option<String> {
        self.inner.restorer.live_id(space_id, original_id)
    }

    /// Run one change notification through the gates
    pub async fn handle_event(&self, event: ChangeEvent) -> Disposition {
        let inner = &self.inner;
        inner.metrics.record_received();

        match self.admit(event).await {
            Ok(fingerprint) => {
                inner.metrics.record_scheduled();
                Disposition::Scheduled { fingerprint }
            }
            Err(reason) => {
                inner.metrics.record_drop(reason);
                Disposition::Dropped(reason)
            }
        }
    }

    async fn admit(&self, event: ChangeEvent) -> std::result::Result<u64, DropReason> {
        let inner = &self.inner;
        let services = &inner.services;
        let space_id = event.space_id.clone();
        let entity_id = event.entity_id.clone();

        if inner.suppressor.is_self_action(&space_id, &entity_id) {
            tracing::debug!(space = %space_id, entity = %entity_id, "Dropped echo of own change");
            return Err(DropReason::SelfAction);
        }

        let config = match services.configs.guard_config(&space_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::error!(
                    space = %space_id,
                    error = %GuardError::ConfigurationMissing(space_id.clone()),
                    "Event ignored"
                );
                return Err(DropReason::ConfigurationMissing);
            }
            Err(e) => {
                tracing::error!(space = %space_id, error = %e, "Guard config lookup failed");
                return Err(DropReason::ConfigurationMissing);
            }
        };
        if !config.enabled {
            tracing::debug!(space = %space_id, "Guard disabled for space");
            return Err(DropReason::Disabled);
        }

        let Some(change) = event.change_kind() else {
            return Err(DropReason::Unclassified);
        };
        let action = ActionKind::new(event.entity_kind, change);
        let Some(rule) = policy::rule_for(action) else {
            tracing::debug!(space = %space_id, %action, "No rule for action");
            return Err(DropReason::Unclassified);
        };

        let executor_id = match self.attribute(&event, action).await {
            Some(executor) => executor,
            None => match rule.attribution {
                AttributionFallback::ProceedUnknown => UNKNOWN_ACTOR.to_string(),
                AttributionFallback::Drop => {
                    tracing::debug!(
                        space = %space_id,
                        entity = %entity_id,
                        %action,
                        "Dropped, attribution unavailable"
                    );
                    return Err(DropReason::AttributionUnavailable);
                }
            },
        };

        if executor_id == services.platform.self_id() {
            tracing::debug!(space = %space_id, entity = %entity_id, "Dropped own action");
            return Err(DropReason::OwnAction);
        }

        let roles = if executor_id == UNKNOWN_ACTOR {
            Vec::new()
        } else {
            services
                .platform
                .member_roles(&space_id, &executor_id)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(
                        space = %space_id,
                        executor = %executor_id,
                        error = %e,
                        "Member roles unavailable for whitelist check"
                    );
                    Vec::new()
                })
        };
        if WhitelistAuthority::is_whitelisted(&config, &executor_id, &roles)
            || inner
                .whitelist
                .check_whitelist(&space_id, &executor_id, action, &roles)
                .await
        {
            tracing::debug!(
                space = %space_id,
                entity = %entity_id,
                executor = %executor_id,
                %action,
                "Dropped whitelisted change"
            );
            return Err(DropReason::Whitelisted);
        }

        let changed_fields = match (&event.before, &event.after) {
            (Some(before), Some(after)) => before.changed_fields(after),
            _ => Vec::new(),
        };
        if change == ChangeKind::Update && changed_fields.is_empty() {
            return Err(DropReason::NoChange);
        }

        if inner.locks.is_held(&space_id, &entity_id) {
            tracing::debug!(space = %space_id, entity = %entity_id, "Remediation already in flight");
            return Err(DropReason::RestoreInProgress);
        }

        let classification = rule.classify(&event);
        let fingerprint = Fingerprint {
            space_id: &space_id,
            violation_type: classification.violation_type,
            target_id: &entity_id,
            executor_id: &executor_id,
            change_digest: change_digest(action, &changed_fields),
        }
        .hash_value();

        let pending = Pending {
            event,
            config,
            rule,
            classification,
            action,
            executor_id,
            changed_fields,
        };
        let engine = self.clone();
        inner
            .debouncer
            .debounce(fingerprint, inner.settings.debounce(), async move {
                engine.fire(pending).await;
            });

        tracing::debug!(space = %space_id, entity = %entity_id, fingerprint, "Change scheduled");
        Ok(fingerprint)
    }

    /// Accept the audit entry only when it targets this entity and is fresh
    async fn attribute(&self, event: &ChangeEvent, action: ActionKind) -> Option<String> {
        let entry = match self.inner.services.audit.lookup(&event.space_id, action).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(space = %event.space_id, %action, error = %e, "Audit lookup failed");
                return None;
            }
        };

        if let Some(target) = &entry.target_id {
            if *target != event.entity_id {
                return None;
            }
        }
        let skew = (event.received_at - entry.at).num_seconds().unsigned_abs();
        if skew > self.inner.settings.audit_freshness_secs {
            tracing::debug!(
                space = %event.space_id,
                entity = %event.entity_id,
                skew_secs = skew,
                "Audit entry too old to attribute"
            );
            return None;
        }
        Some(entry.executor_id)
    }

    /// Classify, act, persist and report one settled change
    async fn fire(&self, pending: Pending) {
        let inner = &self.inner;
        let Pending {
            event,
            config,
            rule,
            mut classification,
            action,
            executor_id,
            changed_fields,
        } = pending;
        let space_id = event.space_id.as_str();

        if !inner.locks.try_acquire(space_id, &event.entity_id) {
            tracing::debug!(space = %space_id, entity = %event.entity_id, "Remediation already in flight");
            inner.metrics.record_drop(DropReason::RestoreInProgress);
            return;
        }

        if let Some(limit) = rule
            .rate_limited
            .and_then(|_| policy::rate_limit_for(&config, action))
        {
            match inner
                .counter
                .exceeds_limit(space_id, &executor_id, action, &limit)
                .await
            {
                Ok(true) => classification = rule.over_limit(classification),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(space = %space_id, executor = %executor_id, error = %e, "Rate counter unavailable");
                }
            }
        }

        let mut violation = Violation::new(
            space_id,
            &executor_id,
            classification.violation_type,
            classification.severity,
            policy::describe(&event, &executor_id, &changed_fields),
        )
        .with_target(&event.entity_id);
        inner.metrics.record_violation();

        let mut notify = false;
        let mut restore_report = None;
        for &step in config.actions_for(classification.severity) {
            let outcome = match step {
                GuardAction::Log => {
                    tracing::info!(
                        space = %space_id,
                        entity = %event.entity_id,
                        executor = %executor_id,
                        violation = %violation.violation_type,
                        severity = %violation.severity,
                        "{}",
                        violation.description
                    );
                    ActionOutcome::ok(step)
                }
                GuardAction::Notify => {
                    if config.notify_channel_id.is_some() {
                        notify = true;
                        ActionOutcome::ok(step)
                    } else {
                        ActionOutcome::failed(step, "no notification channel configured")
                    }
                }
                GuardAction::Restore => {
                    if classification.remediation == Remediation::None {
                        ActionOutcome::ok_with(step, "nothing to restore")
                    } else {
                        let request = RestoreRequest::new(
                            space_id,
                            event.entity_kind,
                            &event.entity_id,
                            classification.remediation,
                        );
                        let report = inner.restorer.restore(&request).await;
                        self.record_restore(&report);
                        if let Some(snapshot_id) = &report.snapshot_id {
                            violation.snapshot_hint = Some(snapshot_id.clone());
                        }
                        let outcome = restore_outcome(step, &report);
                        restore_report = Some(report);
                        outcome
                    }
                }
                GuardAction::Lockdown => match self.lock_space(space_id).await {
                    Ok(()) => {
                        if let Some(channel) = &config.notify_channel_id {
                            self.send(
                                channel,
                                Notification::Lockdown {
                                    space_id: space_id.to_string(),
                                    triggered_by: violation.id.clone(),
                                },
                            );
                        }
                        ActionOutcome::ok(step)
                    }
                    Err(e) => ActionOutcome::failed(step, e.to_string()),
                },
                _ if violation.actor_unknown() => {
                    ActionOutcome::failed(step, "actor unknown, nothing to act on")
                }
                _ => self.moderate(step, &violation, &config).await,
            };

            inner.metrics.record_action(outcome.ok);
            if !outcome.ok {
                tracing::warn!(
                    space = %space_id,
                    violation = %violation.id,
                    action = %step,
                    detail = outcome.detail.as_deref().unwrap_or_default(),
                    "Guard action failed"
                );
            }
            violation.actions_taken.push(outcome);
        }

        self.persist(&violation).await;

        let actor_tally = inner
            .counter
            .tally(space_id, &executor_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(space = %space_id, executor = %executor_id, error = %e, "Violation tally unavailable");
                0
            });

        tracing::info!(
            space = %space_id,
            violation = %violation.id,
            kind = %violation.violation_type,
            severity = %violation.severity,
            executor = %executor_id,
            actor_tally,
            actions = violation.actions_taken.len(),
            "Violation handled"
        );

        if let Some(channel) = &config.notify_channel_id {
            if notify {
                self.send(
                    channel,
                    Notification::Violation {
                        violation,
                        actor_tally,
                        restore: restore_report,
                    },
                );
            } else if let Some(report) = restore_report {
                self.send(channel, Notification::Restore { report });
            }
        }
    }

    /// Kick, ban, strip roles from, or time out the actor
    async fn moderate(
        &self,
        step: GuardAction,
        violation: &Violation,
        config: &GuardConfig,
    ) -> ActionOutcome {
        let platform = &self.inner.services.platform;
        let space_id = violation.space_id.as_str();
        let actor_id = violation.actor_id.as_str();
        let reason = format!("a3s-guard: {}", violation.violation_type);

        let result = match step {
            GuardAction::Kick => platform.kick(space_id, actor_id, &reason).await,
            GuardAction::Ban => platform.ban(space_id, actor_id, &reason).await,
            GuardAction::Timeout => {
                platform
                    .timeout(space_id, actor_id, config.timeout(), &reason)
                    .await
            }
            GuardAction::RemoveRoles => return self.strip_roles(space_id, actor_id).await,
            _ => return ActionOutcome::failed(step, "not a moderation action"),
        };
        match result {
            Ok(()) => ActionOutcome::ok(step),
            Err(e) => ActionOutcome::failed(step, e.to_string()),
        }
    }

    async fn strip_roles(&self, space_id: &str, actor_id: &str) -> ActionOutcome {
        let step = GuardAction::RemoveRoles;
        let platform = &self.inner.services.platform;
        let roles = match platform.member_roles(space_id, actor_id).await {
            Ok(roles) => roles,
            Err(e) => return ActionOutcome::failed(step, e.to_string()),
        };

        // The everyone-role shares the space id and cannot be revoked
        let mut removed = 0;
        let mut failed = 0;
        for role in roles.iter().filter(|r| r.as_str() != space_id) {
            match platform.revoke_role(space_id, actor_id, role).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(space = %space_id, executor = %actor_id, role = %role, error = %e, "Role revoke failed");
                }
            }
        }
        if failed > 0 {
            ActionOutcome::failed(step, format!("{} of {} role(s) not removed", failed, removed + failed))
        } else {
            ActionOutcome::ok_with(step, format!("{} role(s) removed", removed))
        }
    }

    /// Raise verification and strip posting permissions from the everyone-role
    async fn lock_space(&self, space_id: &str) -> Result<()> {
        let inner = &self.inner;
        let platform = &inner.services.platform;
        inner
            .suppressor
            .mark_for(space_id, space_id, inner.settings.slow_self_action_ttl());

        platform
            .set_verification_level(space_id, VerificationLevel::Highest)
            .await?;

        match platform.fetch(space_id, EntityKind::Role, space_id).await? {
            Some(EntityState::Role(mut everyone)) => {
                everyone.permissions = everyone
                    .permissions
                    .difference(Permissions::LOCKDOWN_STRIPPED);
                platform
                    .edit(space_id, space_id, &EntityState::Role(everyone))
                    .await?;
            }
            _ => {
                tracing::warn!(space = %space_id, "Everyone-role not found, permissions left as-is");
            }
        }

        tracing::warn!(space = %space_id, "Space locked down");
        Ok(())
    }

    async fn persist(&self, violation: &Violation) {
        let services = &self.inner.services;
        if let Err(e) = services.violations.record(violation).await {
            self.inner.metrics.record_persist_failure();
            tracing::warn!(violation = %violation.id, error = %e, "Failed to persist violation");
        }
        if let Err(e) = services.search.index(violation).await {
            self.inner.metrics.record_persist_failure();
            tracing::warn!(violation = %violation.id, error = %e, "Failed to index violation");
        }
    }

    fn record_restore(&self, report: &RestoreReport) {
        self.inner.metrics.record_restore(report.succeeded());
        if let Some(sync) = &report.sync {
            self.inner.metrics.record_members_synced(sync.succeeded);
        }
    }

    /// Post a notification without holding up the caller
    fn send(&self, channel_id: &str, notification: Notification) {
        let sink = self.inner.services.notifications.clone();
        let channel_id = channel_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = sink.notify(&channel_id, &notification).await {
                tracing::warn!(
                    space = %notification.space_id(),
                    channel = %channel_id,
                    error = %e,
                    "Notification not delivered"
                );
            }
        });
    }

    async fn notify_channel(&self, space_id: &str) -> Option<String> {
        match self.inner.services.configs.guard_config(space_id).await {
            Ok(Some(config)) => config.notify_channel_id,
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(space = %space_id, error = %e, "Guard config lookup failed");
                None
            }
        }
    }

    /// Manually restore one entity from a snapshot (the latest when no hint)
    pub async fn restore_entity(
        &self,
        space_id: &str,
        kind: EntityKind,
        entity_id: &str,
        snapshot_hint: Option<&str>,
    ) -> Result<RestoreReport> {
        let inner = &self.inner;
        if !inner.locks.try_acquire(space_id, entity_id) {
            return Err(GuardError::Transient(format!(
                "restore of {} '{}' already in progress",
                kind, entity_id
            )));
        }

        let mut request = RestoreRequest::recreate(space_id, kind, entity_id);
        if let Some(hint) = snapshot_hint {
            request = request.with_hint(hint);
        }
        let result = inner.restorer.restore_entity(&request).await;
        match &result {
            Ok(report) => self.record_restore(report),
            Err(_) => inner.metrics.record_restore(false),
        }

        let report = result?;
        if let Some(channel) = self.notify_channel(space_id).await {
            self.send(
                &channel,
                Notification::Restore {
                    report: report.clone(),
                },
            );
        }
        Ok(report)
    }

    /// Recreate everything a snapshot records that the live space lacks
    pub async fn restore_snapshot(
        &self,
        space_id: &str,
        snapshot_id: &str,
    ) -> Result<SnapshotRestoreReport> {
        let report = self
            .inner
            .restorer
            .restore_snapshot(space_id, snapshot_id)
            .await?;
        self.inner
            .metrics
            .record_members_synced(report.members_synced);
        Ok(report)
    }

    /// Re-grant a role to the members a snapshot recorded for it
    pub async fn resync_role_members(
        &self,
        space_id: &str,
        snapshot_id: &str,
        role_id: &str,
    ) -> Result<SyncReport> {
        let report = self
            .inner
            .restorer
            .resync_role_members(space_id, snapshot_id, role_id)
            .await?;
        self.inner.metrics.record_members_synced(report.succeeded);
        Ok(report)
    }

    /// Manually lock a space down
    pub async fn lockdown(&self, space_id: &str, triggered_by: &str) -> Result<()> {
        self.lock_space(space_id).await?;
        if let Some(channel) = self.notify_channel(space_id).await {
            self.send(
                &channel,
                Notification::Lockdown {
                    space_id: space_id.to_string(),
                    triggered_by: triggered_by.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Most recent violations for a space, newest first
    pub async fn violations(&self, space_id: &str, limit: usize) -> Result<Vec<Violation>> {
        self.inner.services.violations.list(space_id, limit).await
    }

    /// Violations recorded against an actor in the tally window
    pub async fn actor_tally(&self, space_id: &str, actor_id: &str) -> Result<u64> {
        self.inner.counter.current_tally(space_id, actor_id).await
    }

    /// Consume an event source until it closes, one task per event
    pub async fn run<S: EventSource>(&self, mut source: S) -> Result<()> {
        tracing::info!("Guard engine listening for changes");
        while let Some(event) = source.next().await? {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.handle_event(event).await;
            });
        }
        tracing::info!("Event source closed");
        Ok(())
    }

    /// Evict expired markers, locks, cache slots and id mappings
    pub fn sweep(&self) -> usize {
        let inner = &self.inner;
        let evicted = inner.suppressor.sweep()
            + inner.locks.sweep()
            + inner.whitelist.sweep()
            + inner.restorer.sweep();
        if evicted > 0 {
            tracing::debug!(evicted, "Expired guard state swept");
        }
        evicted
    }

    /// Start the periodic sweep; a second call is a no-op
    pub fn spawn_sweeper(&self) {
        let mut slot = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.sweep_interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                GuardEngine { inner }.sweep();
            }
        }));
    }

    /// Cancel pending debounces, stop the sweeper and drop all TTL state
    pub fn shutdown(&self) {
        let inner = &self.inner;
        let cancelled = inner.debouncer.flush();
        if let Some(handle) = inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        inner.suppressor.clear();
        inner.locks.clear();
        inner.whitelist.clear();
        inner.restorer.clear();
        tracing::info!(cancelled, "Guard engine shut down");
    }
}

fn restore_outcome(step: GuardAction, report: &RestoreReport) -> ActionOutcome {
    match report.live_id() {
        Some(id) if report.succeeded() => ActionOutcome::ok_with(step, format!("live as {}", id)),
        _ if report.succeeded() => ActionOutcome::ok(step),
        _ => match &report.outcome {
            RestoreOutcome::Failed { reason } => {
                ActionOutcome::failed(step, reason.clone())
            }
            _ => ActionOutcome::failed(step, "restore failed"),
        },
    }
}
