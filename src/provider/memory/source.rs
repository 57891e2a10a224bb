use crate::error::{GuardError, Result};
use crate::provider::EventSource;
use crate::types::ChangeEvent;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Channel-backed event source
pub struct MemoryEventSource {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Producer half of a [`MemoryEventSource`]
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl MemoryEventSource {
    /// Create a connected sender/source pair
    pub fn channel() -> (EventSender, MemoryEventSource) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, MemoryEventSource { rx })
    }
}

impl EventSender {
    pub fn send(&self, event: ChangeEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| GuardError::Connection("event source closed".to_string()))
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn next(&mut self) -> Result<Option<ChangeEvent>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityState, RoleState};

    #[tokio::test]
    async fn test_events_arrive_in_order_then_close() {
        let (tx, mut source) = MemoryEventSource::channel();
        tx.send(ChangeEvent::created("s1", EntityState::Role(RoleState::new("r1", "a"))))
            .unwrap();
        tx.send(ChangeEvent::deleted("s1", EntityState::Role(RoleState::new("r2", "b"))))
            .unwrap();
        drop(tx);

        assert_eq!(source.next().await.unwrap().unwrap().entity_id, "r1");
        assert_eq!(source.next().await.unwrap().unwrap().entity_id, "r2");
        assert!(source.next().await.unwrap().is_none());
    }

    #[test]
    fn test_send_after_close_fails() {
        let (tx, source) = MemoryEventSource::channel();
        drop(source);
        let event = ChangeEvent::created("s1", EntityState::Role(RoleState::new("r1", "a")));
        assert!(matches!(tx.send(event), Err(GuardError::Connection(_))));
    }
}
