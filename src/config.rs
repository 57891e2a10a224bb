//! Guard configuration
//!
//! `EngineSettings` tunes the engine's timers and batch sizes;
//! `GuardConfig` is the per-space policy (action lists, static exemptions,
//! rate limits). Both load from TOML with per-field defaults, and
//! `GuardSettings` doubles as a file-backed [`ConfigStore`].

use crate::error::{GuardError, Result};
use crate::provider::ConfigStore;
use crate::types::GuardAction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Engine-wide timing and batching knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Quiet period before a debounced change is classified
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Lifetime of a self-action marker
    #[serde(default = "default_self_action_ttl_secs")]
    pub self_action_ttl_secs: u64,

    /// Marker lifetime for flows that settle slowly (recreated parents, lockdown)
    #[serde(default = "default_slow_self_action_ttl_secs")]
    pub slow_self_action_ttl_secs: u64,

    /// Hold time of a restoration-in-progress lock
    #[serde(default = "default_restore_lock_secs")]
    pub restore_lock_secs: u64,

    /// TTL of cached whitelist sub-checks
    #[serde(default = "default_whitelist_cache_ttl_secs")]
    pub whitelist_cache_ttl_secs: u64,

    /// Interval of the periodic expiry sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum number of snapshots tried per restore
    #[serde(default = "default_max_snapshot_fallback")]
    pub max_snapshot_fallback: usize,

    /// Maximum age of an audit entry relative to the event
    #[serde(default = "default_audit_freshness_secs")]
    pub audit_freshness_secs: u64,

    /// How long original → recreated id mappings are remembered
    #[serde(default = "default_restored_id_ttl_secs")]
    pub restored_id_ttl_secs: u64,

    /// Window of the per-actor violation tally
    #[serde(default = "default_tally_window_secs")]
    pub tally_window_secs: u64,

    #[serde(default)]
    pub sync: SyncSettings,
}

/// Bulk membership sync backpressure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches run concurrently per group
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause between batch groups
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_self_action_ttl_secs() -> u64 {
    10
}

fn default_slow_self_action_ttl_secs() -> u64 {
    30
}

fn default_restore_lock_secs() -> u64 {
    15
}

fn default_whitelist_cache_ttl_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_snapshot_fallback() -> usize {
    10
}

fn default_audit_freshness_secs() -> u64 {
    15
}

fn default_restored_id_ttl_secs() -> u64 {
    600
}

fn default_tally_window_secs() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    50
}

fn default_concurrency() -> usize {
    5
}

fn default_batch_pause_ms() -> u64 {
    1000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl SyncSettings {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            self_action_ttl_secs: default_self_action_ttl_secs(),
            slow_self_action_ttl_secs: default_slow_self_action_ttl_secs(),
            restore_lock_secs: default_restore_lock_secs(),
            whitelist_cache_ttl_secs: default_whitelist_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_snapshot_fallback: default_max_snapshot_fallback(),
            audit_freshness_secs: default_audit_freshness_secs(),
            restored_id_ttl_secs: default_restored_id_ttl_secs(),
            tally_window_secs: default_tally_window_secs(),
            sync: SyncSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn self_action_ttl(&self) -> Duration {
        Duration::from_secs(self.self_action_ttl_secs)
    }

    pub fn slow_self_action_ttl(&self) -> Duration {
        Duration::from_secs(self.slow_self_action_ttl_secs)
    }

    pub fn restore_lock(&self) -> Duration {
        Duration::from_secs(self.restore_lock_secs)
    }

    pub fn whitelist_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.whitelist_cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn restored_id_ttl(&self) -> Duration {
        Duration::from_secs(self.restored_id_ttl_secs)
    }

    pub fn tally_window(&self) -> Duration {
        Duration::from_secs(self.tally_window_secs)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_snapshot_fallback == 0 {
            return Err(GuardError::Config(
                "max_snapshot_fallback must be >= 1".to_string(),
            ));
        }
        if self.sync.batch_size == 0 || self.sync.concurrency == 0 {
            return Err(GuardError::Config(
                "sync batch_size and concurrency must be >= 1".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(GuardError::Config(
                "sweep_interval_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Threshold for a counted action within a sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub threshold: u64,
    pub window_secs: u64,
}

impl RateLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_invite_limit")]
    pub invite_create: RateLimit,
    #[serde(default = "default_webhook_limit")]
    pub webhook_create: RateLimit,
}

fn default_invite_limit() -> RateLimit {
    RateLimit {
        threshold: 10,
        window_secs: 3600,
    }
}

fn default_webhook_limit() -> RateLimit {
    RateLimit {
        threshold: 3,
        window_secs: 3600,
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            invite_create: default_invite_limit(),
            webhook_create: default_webhook_limit(),
        }
    }
}

/// Per-space guard policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Channel notifications are posted to; none disables notify
    #[serde(default)]
    pub notify_channel_id: Option<String>,

    /// Actions for high and critical violations
    #[serde(default = "default_on_violation")]
    pub on_violation: Vec<GuardAction>,

    /// Actions for low and medium violations
    #[serde(default = "default_on_suspicious_activity")]
    pub on_suspicious_activity: Vec<GuardAction>,

    /// Duration of the timeout action
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Statically exempt users
    #[serde(default)]
    pub whitelisted_users: Vec<String>,

    /// Statically exempt roles
    #[serde(default)]
    pub whitelisted_roles: Vec<String>,

    #[serde(default)]
    pub limits: RateLimits,
}

fn default_enabled() -> bool {
    true
}

fn default_on_violation() -> Vec<GuardAction> {
    vec![GuardAction::Log, GuardAction::Restore, GuardAction::Notify]
}

fn default_on_suspicious_activity() -> Vec<GuardAction> {
    vec![GuardAction::Log, GuardAction::Notify]
}

fn default_timeout_secs() -> u64 {
    3600
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            notify_channel_id: None,
            on_violation: default_on_violation(),
            on_suspicious_activity: default_on_suspicious_activity(),
            timeout_secs: default_timeout_secs(),
            whitelisted_users: Vec::new(),
            whitelisted_roles: Vec::new(),
            limits: RateLimits::default(),
        }
    }
}

impl GuardConfig {
    /// Action list for a severity
    pub fn actions_for(&self, severity: crate::types::Severity) -> &[GuardAction] {
        if severity.is_violation() {
            &self.on_violation
        } else {
            &self.on_suspicious_activity
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete settings file: engine knobs plus per-space policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardSettings {
    #[serde(default)]
    pub engine: EngineSettings,

    /// Space id → policy
    #[serde(default)]
    pub spaces: HashMap<String, GuardConfig>,
}

impl GuardSettings {
    /// Parse settings from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: GuardSettings = toml::from_str(content)?;
        settings.engine.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let settings = Self::from_toml_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            spaces = settings.spaces.len(),
            "Guard settings loaded"
        );
        Ok(settings)
    }

    pub fn with_space(mut self, space_id: impl Into<String>, config: GuardConfig) -> Self {
        self.spaces.insert(space_id.into(), config);
        self
    }
}

#[async_trait]
impl ConfigStore for GuardSettings {
    async fn guard_config(&self, space_id: &str) -> Result<Option<GuardConfig>> {
        Ok(self.spaces.get(space_id).cloned())
    }
}
