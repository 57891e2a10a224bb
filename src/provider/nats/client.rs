//! NATS JetStream client: connect, publish changes, open consumers

use super::config::{NatsConfig, StartPolicy, StorageType};
use super::sink::NatsNotificationSink;
use super::source::NatsEventSource;
use crate::error::{GuardError, Result};
use crate::types::ChangeEvent;
use async_nats::jetstream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Connection plus the change stream handle
pub struct NatsClient {
    client: async_nats::Client,

    jetstream: jetstream::Context,

    /// Mutex for stream methods requiring &mut self
    stream: Mutex<jetstream::stream::Stream>,

    config: Arc<NatsConfig>,
}

impl NatsClient {
    /// Connect to NATS and make sure the change stream exists
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| GuardError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());
        let stream = ensure_stream(&jetstream, &config).await?;

        Ok(Self {
            client,
            jetstream,
            stream: Mutex::new(stream),
            config: Arc::new(config),
        })
    }

    /// Publish a change notification, returning its stream sequence
    pub async fn publish_change(&self, event: &ChangeEvent) -> Result<u64> {
        let subject = self.config.change_subject(&event.space_id);
        let payload = serde_json::to_vec(event)?;

        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| GuardError::Publish {
                subject: subject.clone(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| GuardError::Publish {
                subject: subject.clone(),
                reason: format!("ack failed: {}", e),
            })?;

        tracing::debug!(
            space = %event.space_id,
            entity = %event.entity_id,
            subject = %subject,
            sequence = ack.sequence,
            "Change published"
        );
        Ok(ack.sequence)
    }

    /// Open the durable change consumer named in the config
    pub async fn event_source(&self) -> Result<NatsEventSource> {
        self.event_source_named(&self.config.consumer_name).await
    }

    /// Open (or resume) a durable pull consumer over every change subject
    pub async fn event_source_named(&self, consumer_name: &str) -> Result<NatsEventSource> {
        let filter_subject = format!("{}.changes.>", self.config.subject_prefix);
        let config = build_consumer_config(&filter_subject, consumer_name, self.config.start);

        let consumer = self
            .stream
            .lock()
            .await
            .get_or_create_consumer(consumer_name, config)
            .await
            .map_err(|e| {
                GuardError::Consumer(format!(
                    "Failed to create durable consumer '{}': {}",
                    consumer_name, e
                ))
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| GuardError::Subscribe {
                subject: filter_subject.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            consumer = consumer_name,
            filter = %filter_subject,
            start = ?self.config.start,
            "Change consumer ready"
        );
        Ok(NatsEventSource::new(messages, consumer_name.to_string()))
    }

    /// Sink publishing notifications over this connection
    pub fn notification_sink(&self) -> NatsNotificationSink {
        NatsNotificationSink::new(self.client.clone(), self.config.notify_prefix.clone())
    }

    /// Delete a durable consumer
    pub async fn delete_consumer(&self, consumer_name: &str) -> Result<()> {
        self.stream
            .lock()
            .await
            .delete_consumer(consumer_name)
            .await
            .map_err(|e| {
                GuardError::Consumer(format!(
                    "Failed to delete consumer '{}': {}",
                    consumer_name, e
                ))
            })?;

        tracing::info!(consumer = consumer_name, "Consumer deleted");
        Ok(())
    }

    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self.stream.lock().await;
        let info = stream
            .info()
            .await
            .map_err(|e| GuardError::Stream(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        })
    }

    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

/// Summary of stream state
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: usize,
}

fn build_consumer_config(
    filter_subject: &str,
    consumer_name: &str,
    start: StartPolicy,
) -> jetstream::consumer::pull::Config {
    let deliver_policy = match start {
        StartPolicy::New => jetstream::consumer::DeliverPolicy::New,
        StartPolicy::All => jetstream::consumer::DeliverPolicy::All,
        StartPolicy::ByStartTime { timestamp_ms } => {
            let secs = timestamp_ms / 1000;
            let nanos = (timestamp_ms % 1000) * 1_000_000;
            let start_time = time::OffsetDateTime::from_unix_timestamp(secs as i64)
                .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
                + time::Duration::nanoseconds(nanos as i64);
            jetstream::consumer::DeliverPolicy::ByStartTime { start_time }
        }
    };

    jetstream::consumer::pull::Config {
        durable_name: Some(consumer_name.to_string()),
        filter_subject: filter_subject.to_string(),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        deliver_policy,
        ..Default::default()
    }
}

fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

async fn ensure_stream(
    js: &jetstream::Context,
    config: &NatsConfig,
) -> Result<jetstream::stream::Stream> {
    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.stream_subjects(),
        storage,
        max_messages: config.max_events,
        max_age: Duration::from_secs(config.max_age_secs),
        max_bytes: config.max_bytes,
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    let stream = js.get_or_create_stream(stream_config).await.map_err(|e| {
        GuardError::Stream(format!(
            "Failed to create/get stream '{}': {}",
            config.stream_name, e
        ))
    })?;

    tracing::info!(
        stream = %config.stream_name,
        subjects = ?config.stream_subjects(),
        "JetStream stream ready"
    );
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_start_policies() {
        let config = build_consumer_config("guard.changes.>", "g1", StartPolicy::All);
        assert_eq!(config.durable_name.as_deref(), Some("g1"));
        assert!(matches!(
            config.deliver_policy,
            jetstream::consumer::DeliverPolicy::All
        ));

        let config = build_consumer_config(
            "guard.changes.>",
            "g1",
            StartPolicy::ByStartTime {
                timestamp_ms: 1_500,
            },
        );
        match config.deliver_policy {
            jetstream::consumer::DeliverPolicy::ByStartTime { start_time } => {
                assert_eq!(start_time.unix_timestamp(), 1);
                assert_eq!(start_time.millisecond(), 500);
            }
            other => panic!("unexpected policy {:?}", other),
        }
    }
}
