//! JetStream-backed change source

use crate::error::{GuardError, Result};
use crate::provider::EventSource;
use crate::types::ChangeEvent;
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;

/// Durable pull consumer yielding decoded [`ChangeEvent`]s
///
/// Messages are acknowledged on receipt. Redeliveries are absorbed by the
/// engine's debounce and self-action gates. Payloads that do not decode are
/// acknowledged and skipped so one bad message cannot wedge the consumer.
pub struct NatsEventSource {
    messages: jetstream::consumer::pull::Stream,
    consumer_name: String,
}

impl NatsEventSource {
    pub(crate) fn new(messages: jetstream::consumer::pull::Stream, consumer_name: String) -> Self {
        Self {
            messages,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }
}

#[async_trait]
impl EventSource for NatsEventSource {
    async fn next(&mut self) -> Result<Option<ChangeEvent>> {
        loop {
            let msg = match self.messages.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Err(GuardError::Consumer(format!(
                        "Consumer '{}' failed: {}",
                        self.consumer_name, e
                    )))
                }
                None => return Ok(None),
            };

            let decoded = serde_json::from_slice::<ChangeEvent>(&msg.payload);
            msg.ack().await.map_err(|e| GuardError::Ack(e.to_string()))?;

            match decoded {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    tracing::warn!(
                        consumer = %self.consumer_name,
                        subject = %msg.subject,
                        error = %e,
                        "Skipping undecodable change message"
                    );
                }
            }
        }
    }
}
