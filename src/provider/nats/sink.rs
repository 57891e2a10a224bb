//! Notification publisher over core NATS

use crate::error::{GuardError, Result};
use crate::provider::NotificationSink;
use crate::types::Notification;
use async_trait::async_trait;
use bytes::Bytes;

/// Header carrying the configured notification channel
pub const CHANNEL_HEADER: &str = "Guard-Channel";

/// Publishes notification JSON to `<prefix>.<space>`
pub struct NatsNotificationSink {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotificationSink {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub fn subject_for(&self, space_id: &str) -> String {
        format!("{}.{}", self.prefix, space_id)
    }
}

#[async_trait]
impl NotificationSink for NatsNotificationSink {
    async fn notify(&self, channel_id: &str, notification: &Notification) -> Result<()> {
        let subject = self.subject_for(notification.space_id());
        let payload = Bytes::from(serde_json::to_vec(notification)?);

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(CHANNEL_HEADER, channel_id);

        self.client
            .publish_with_headers(subject.clone(), headers, payload)
            .await
            .map_err(|e| GuardError::Publish {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(subject = %subject, channel = %channel_id, "Notification published");
        Ok(())
    }
}
