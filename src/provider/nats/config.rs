//! NATS connection and stream configuration

use serde::{Deserialize, Serialize};

/// JetStream storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

/// Where a newly created durable consumer starts reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum StartPolicy {
    /// Only changes published after the consumer exists
    #[default]
    New,
    /// Everything still retained by the stream
    All,
    /// Changes published at or after a unix timestamp in milliseconds
    ByStartTime { timestamp_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Change subjects live under `<subject_prefix>.changes.>`
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Notifications are published to `<notify_prefix>.<space>`
    #[serde(default = "default_notify_prefix")]
    pub notify_prefix: String,

    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    #[serde(default)]
    pub start: StartPolicy,

    #[serde(default)]
    pub storage: StorageType,

    /// Maximum retained change messages (0 = unlimited)
    #[serde(default = "default_max_events")]
    pub max_events: i64,

    /// Maximum message age in seconds (0 = unlimited)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Maximum stream size in bytes (-1 = unlimited)
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_stream_name() -> String {
    "GUARD_CHANGES".to_string()
}

fn default_subject_prefix() -> String {
    "guard".to_string()
}

fn default_notify_prefix() -> String {
    "guard.notify".to_string()
}

fn default_consumer_name() -> String {
    "a3s-guard".to_string()
}

fn default_max_events() -> i64 {
    100_000
}

fn default_max_age_secs() -> u64 {
    86_400
}

fn default_max_bytes() -> i64 {
    -1
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: None,
            stream_name: default_stream_name(),
            subject_prefix: default_subject_prefix(),
            notify_prefix: default_notify_prefix(),
            consumer_name: default_consumer_name(),
            start: StartPolicy::default(),
            storage: StorageType::default(),
            max_events: default_max_events(),
            max_age_secs: default_max_age_secs(),
            max_bytes: default_max_bytes(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl NatsConfig {
    /// Subjects captured by the change stream
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.changes.>", self.subject_prefix)]
    }

    /// Subject a space's changes are published to
    pub fn change_subject(&self, space_id: &str) -> String {
        format!("{}.changes.{}", self.subject_prefix, space_id)
    }

    /// Subject a space's notifications are published to
    pub fn notify_subject(&self, space_id: &str) -> String {
        format!("{}.{}", self.notify_prefix, space_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        let config = NatsConfig::default();
        assert_eq!(config.stream_subjects(), vec!["guard.changes.>".to_string()]);
        assert_eq!(config.change_subject("s1"), "guard.changes.s1");
        assert_eq!(config.notify_subject("s1"), "guard.notify.s1");
    }

    #[test]
    fn test_parse_with_start_policy() {
        let config: NatsConfig = toml::from_str(
            r#"
            url = "nats://nats:4222"
            storage = "memory"

            [start]
            policy = "by_start_time"
            timestamp_ms = 1700000000000
            "#,
        )
        .unwrap();
        assert_eq!(config.url, "nats://nats:4222");
        assert_eq!(config.storage, StorageType::Memory);
        assert_eq!(
            config.start,
            StartPolicy::ByStartTime {
                timestamp_ms: 1_700_000_000_000
            }
        );
        assert_eq!(config.consumer_name, "a3s-guard");
    }
}
