//! The outbox polling worker (`spec.md` §4.8), grounded in the
//! "Postgres-then-Redpanda" sequencing documented in
//! [`composable_rust_redpanda`]'s module docs: persist first, publish
//! second. Here the persist half already happened (the producer wrote the
//! row in its own transaction); this worker is the publish half, running
//! out-of-band on a timer instead of inline after the write.

use crate::config::OutboxConfig;
use crate::consumer::EVENTS_TOPIC;
use composable_rust_core::event::SerializedEvent;
use composable_rust_core::event_bus::EventBus;
use composable_rust_core::outbox_store::OutboxStore;
use std::sync::Arc;
use std::time::Duration;

/// Polls `OutboxStore::fetch_pending` on an interval, publishes each row to
/// the event bus, and marks it published on success. A row that fails to
/// publish is left `pending` for the next poll (§4.8); the consumer side's
/// dedup (§4.1) absorbs the resulting at-least-once redelivery.
pub struct OutboxWorker {
    store: Arc<dyn OutboxStore>,
    event_bus: Arc<dyn EventBus>,
    config: OutboxConfig,
}

impl OutboxWorker {
    /// Wire a worker against its store and bus, polling per `config`.
    #[must_use]
    pub fn new(store: Arc<dyn OutboxStore>, event_bus: Arc<dyn EventBus>, config: OutboxConfig) -> Self {
        Self { store, event_bus, config }
    }

    /// Run the poll loop until `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("outbox worker shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// One poll cycle: fetch a batch, publish each row, mark the successes.
    async fn poll_once(&self) {
        let entries = match self.store.fetch_pending(i64::from(self.config.batch_size)).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::error!(%error, "outbox poll failed");
                metrics::counter!("outbox.poll_errors.total").increment(1);
                return;
            }
        };

        for entry in entries {
            let event = SerializedEvent::new(
                entry.routing_key.clone(),
                serde_json::to_vec(&entry.payload).unwrap_or_default(),
                None,
            );
            match self.event_bus.publish(EVENTS_TOPIC, &event).await {
                Ok(()) => match self.store.mark_published(entry.id).await {
                    Ok(()) => {
                        metrics::counter!("outbox.published.total", "routing_key" => entry.routing_key.clone())
                            .increment(1);
                    }
                    Err(error) => {
                        tracing::error!(%error, entry_id = entry.id, "failed to mark outbox entry published");
                    }
                },
                Err(error) => {
                    tracing::warn!(%error, entry_id = entry.id, "failed to publish outbox entry, leaving pending");
                    metrics::counter!("outbox.publish_errors.total").increment(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composable_rust_testing::{InMemoryEventBus, InMemoryOutboxStore};
    use futures::StreamExt;

    #[tokio::test]
    async fn pending_entries_are_published_and_marked() {
        let store = Arc::new(InMemoryOutboxStore::new());
        store
            .append("agg-1", "post.liked", serde_json::json!({"post_owner": "u1"}))
            .await
            .expect("append should succeed");

        let bus = Arc::new(InMemoryEventBus::new(16));
        let mut stream = bus.subscribe(&[EVENTS_TOPIC]).await.expect("subscribe should succeed");

        let worker = OutboxWorker::new(
            store.clone(),
            bus,
            OutboxConfig { poll_interval_ms: 100, batch_size: 10 },
        );
        worker.poll_once().await;

        let received = stream.next().await.expect("event should have been published");
        let event = received.expect("publish should not error");
        assert_eq!(event.event_type, "post.liked");

        let remaining = store.fetch_pending(10).await.expect("fetch_pending should succeed");
        assert!(remaining.is_empty());
    }
}
