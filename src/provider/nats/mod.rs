//! NATS JetStream adapters
//!
//! Change notifications are published as JSON [`ChangeEvent`]s to
//! `<subject_prefix>.changes.<space>` on a JetStream stream and consumed
//! through a durable pull consumer ([`NatsEventSource`]). Notification
//! summaries go out over core NATS to `<notify_prefix>.<space>`
//! ([`NatsNotificationSink`]).
//!
//! [`ChangeEvent`]: crate::types::ChangeEvent

mod client;
mod config;
mod sink;
mod source;

pub use client::{NatsClient, StreamInfo};
pub use config::{NatsConfig, StartPolicy, StorageType};
pub use sink::{NatsNotificationSink, CHANNEL_HEADER};
pub use source::NatsEventSource;
