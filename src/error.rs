//! Error types for a3s-guard

use crate::types::EntityKind;
use thiserror::Error;

/// Errors that can occur while guarding a space
#[derive(Debug, Error)]
pub enum GuardError {
    /// Slow or empty external lookup, retryable at a later event
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The requested entity is not recorded in the given snapshot
    #[error("{kind} '{entity_id}' not found in snapshot '{snapshot_id}'")]
    NotFoundInSnapshot {
        snapshot_id: String,
        kind: EntityKind,
        entity_id: String,
    },

    /// The snapshot records the id under a different entity kind
    #[error("Snapshot '{snapshot_id}' holds '{entity_id}' as {found}, expected {expected}")]
    TypeMismatch {
        snapshot_id: String,
        entity_id: String,
        expected: EntityKind,
        found: EntityKind,
    },

    /// The platform refused the call for lack of privilege
    #[error("Permission denied for '{operation}': {reason}")]
    PermissionDenied {
        operation: String,
        reason: String,
    },

    /// The platform throttled the call
    #[error("Rate limited on '{operation}', retry after {retry_after_ms}ms")]
    RateLimited {
        operation: String,
        retry_after_ms: u64,
    },

    /// Any other platform rejection
    #[error("Platform call '{operation}' failed: {reason}")]
    Platform {
        operation: String,
        reason: String,
    },

    /// No guard configuration exists for the space
    #[error("No guard configuration for space '{0}'")]
    ConfigurationMissing(String),

    /// No snapshot has ever been captured for the space
    #[error("No snapshot available for space '{0}'")]
    NoSnapshot(String),

    /// Every candidate snapshot was tried without success
    #[error("Failed to restore {kind} '{entity_id}' after {attempts} snapshot attempt(s)")]
    RestoreFailed {
        kind: EntityKind,
        entity_id: String,
        attempts: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration parse failure
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event source connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stream creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Subscribe failure
    #[error("Failed to subscribe to subject '{subject}': {reason}")]
    Subscribe {
        subject: String,
        reason: String,
    },

    /// Publish failure
    #[error("Failed to publish to subject '{subject}': {reason}")]
    Publish {
        subject: String,
        reason: String,
    },

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),
}

impl GuardError {
    /// Build a generic platform rejection
    pub fn platform(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Platform {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Build a permission rejection
    pub fn permission_denied(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// True when the engine lacks privilege over the target
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// True when an older snapshot might still succeed where this attempt failed
    pub fn is_fallback_candidate(&self) -> bool {
        matches!(
            self,
            Self::NotFoundInSnapshot { .. }
                | Self::TypeMismatch { .. }
                | Self::Platform { .. }
                | Self::RateLimited { .. }
                | Self::Transient(_)
        )
    }
}

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_classification() {
        let miss = GuardError::NotFoundInSnapshot {
            snapshot_id: "snap-1".to_string(),
            kind: EntityKind::Role,
            entity_id: "r1".to_string(),
        };
        assert!(miss.is_fallback_candidate());
        assert!(!miss.is_permission_denied());

        let denied = GuardError::permission_denied("create_role", "missing MANAGE_ROLES");
        assert!(denied.is_permission_denied());
        assert!(!denied.is_fallback_candidate());

        assert!(!GuardError::ConfigurationMissing("s1".to_string()).is_fallback_candidate());
    }

    #[test]
    fn test_error_messages() {
        let err = GuardError::NotFoundInSnapshot {
            snapshot_id: "snap-3".to_string(),
            kind: EntityKind::Channel,
            entity_id: "c9".to_string(),
        };
        assert_eq!(err.to_string(), "channel 'c9' not found in snapshot 'snap-3'");

        let err = GuardError::RestoreFailed {
            kind: EntityKind::Emoji,
            entity_id: "e1".to_string(),
            attempts: 10,
        };
        assert!(err.to_string().contains("10 snapshot attempt(s)"));
    }
}
