//! Change notification bus
//!
//! Services publish after commit; subscribers (SSE clients) re-query.
//! Lagging receivers lose messages, never block publishers.

use shared::models::ChangeEvent;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No subscribers is normal
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();
        bus.publish(ChangeEvent::Cleaner {
            organization_id: "org_1".into(),
            cleaner_id: 5,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.organization_id(), Some("org_1"));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        ChangeBus::new().publish(ChangeEvent::Quote {
            organization_id: "org_1".into(),
            quote_id: 1,
        });
    }
}
