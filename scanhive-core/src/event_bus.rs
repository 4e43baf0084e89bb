//! In-process implementation of `scanhive_contracts::EventBus`. The trait itself allows a
//! thin RPC layer to fan events out over a wire transport (as the teacher's
//! `scan::fs_watch::event_bus` module does for file-change events via Postgres polling);
//! this core only needs an in-process default, so it backs the trait with a broadcast
//! channel instead of a durable transport.

use async_trait::async_trait;
use scanhive_contracts::{EventBus, ScanEvent};
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub struct BroadcastEventBus {
    tx: broadcast::Sender<ScanEvent>,
}

impl BroadcastEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to future events. Lagging subscribers miss events rather than blocking
    /// publishers; the core itself never subscribes to its own bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: ScanEvent) {
        trace!(kind = ?event.kind, job_id = %event.job_id, "publishing scan event");
        // A send error only means there are currently no subscribers; that's not a
        // failure the publisher needs to react to.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanhive_contracts::ScanEventKind;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = BroadcastEventBus::new();
        let mut rx = bus.subscribe();

        let job_id = Uuid::new_v4();
        let library_id = Uuid::new_v4();
        bus.publish(ScanEvent::new(ScanEventKind::ScanStarted, job_id, library_id, json!({})))
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, ScanEventKind::ScanStarted);
        assert_eq!(received.job_id, job_id);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = BroadcastEventBus::new();
        bus.publish(ScanEvent::new(
            ScanEventKind::ScanProgress,
            Uuid::new_v4(),
            Uuid::new_v4(),
            json!({}),
        ))
        .await;
    }
}
