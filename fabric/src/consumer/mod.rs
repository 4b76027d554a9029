//! Event consumer: subscribes to `social.events`, dedups, dispatches to a
//! typed handler per routing key, aggregates where applicable, and persists
//! notifications.

mod dispatch;
mod follower_lookup;

pub use dispatch::{DEFAULT_AGGREGATE_WINDOW, DispatchError, dispatch, dispatch_with_window};
pub use follower_lookup::{FollowerLookup, NullFollowerLookup};

use crate::domain::event::{EnvelopeError, EventEnvelope};
use crate::router::RealtimeNotifier;
use composable_rust_core::event_bus::{EventBus, EventBusError};
use composable_rust_core::idempotency_store::{CheckOutcome, DEFAULT_DEDUP_TTL, IdempotencyStore};
use composable_rust_core::notification_store::NotificationStore;
use futures::StreamExt;
use std::sync::Arc;

/// The single Kafka-compatible topic that carries every routing key.
///
/// Kafka/rdkafka has no concept of an AMQP topic-exchange binding, so the
/// binding list from `spec.md` §4.1/§6 collapses to one topic; routing keys
/// travel inside [`EventEnvelope`] and dispatch happens in this module
/// instead of at the broker.
pub const EVENTS_TOPIC: &str = "social.events";

const DEDUP_NAMESPACE: &str = "processed_msg:";

/// Dependencies the consumer loop dispatches against.
pub struct Consumer {
    event_bus: Arc<dyn EventBus>,
    idempotency_store: Arc<dyn IdempotencyStore>,
    notification_store: Arc<dyn NotificationStore>,
    followers: Arc<dyn FollowerLookup>,
    notify: Arc<dyn RealtimeNotifier>,
    aggregate_window: chrono::Duration,
}

impl Consumer {
    /// Wire a consumer against its five capability dependencies, aggregating
    /// within `aggregate_window` (the configured `aggregate_window_h`).
    #[must_use]
    pub fn new(
        event_bus: Arc<dyn EventBus>,
        idempotency_store: Arc<dyn IdempotencyStore>,
        notification_store: Arc<dyn NotificationStore>,
        followers: Arc<dyn FollowerLookup>,
        notify: Arc<dyn RealtimeNotifier>,
        aggregate_window: chrono::Duration,
    ) -> Self {
        Self {
            event_bus,
            idempotency_store,
            notification_store,
            followers,
            notify,
            aggregate_window,
        }
    }

    /// Subscribe to [`EVENTS_TOPIC`] and process events until the stream
    /// ends or `shutdown` fires.
    ///
    /// Each event is acknowledged implicitly by advancing the stream;
    /// handler errors are logged and do not stop the loop (per §4.1, a
    /// transient error nacks without requeue at the broker, which this
    /// consumer has no authority over once rdkafka has delivered the
    /// message — it only controls whether the dedup key survives to allow a
    /// redrive).
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut stream = match self.event_bus.subscribe(&[EVENTS_TOPIC]).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(%error, "failed to subscribe to events topic");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("event consumer shutting down");
                    return;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(raw)) => self.handle_one(raw).await,
                        Some(Err(error)) => self.handle_stream_error(error),
                        None => {
                            tracing::warn!("event bus stream ended");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle_stream_error(&self, error: EventBusError) {
        tracing::error!(%error, "event stream error");
        metrics::counter!("consumer.stream_errors.total").increment(1);
    }

    async fn handle_one(&self, raw: composable_rust_core::event::SerializedEvent) {
        let envelope = match EventEnvelope::from_serialized(&raw) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::UnknownRoutingKey(unknown)) => {
                tracing::warn!(%unknown, "dropping event with unrecognized routing key");
                metrics::counter!("consumer.unknown_routing_key.total").increment(1);
                return;
            }
            Err(EnvelopeError::InvalidPayload(error)) => {
                tracing::warn!(%error, "dropping event with malformed payload");
                metrics::counter!("consumer.invalid_payload.total").increment(1);
                return;
            }
        };

        let dedup_key = envelope.dedup_key();
        match self
            .idempotency_store
            .check_and_mark(DEDUP_NAMESPACE, &dedup_key, DEFAULT_DEDUP_TTL)
            .await
        {
            Ok(CheckOutcome::Duplicate) => {
                tracing::debug!(
                    routing_key = envelope.routing_key.as_str(),
                    "duplicate event, skipping"
                );
                metrics::counter!("consumer.duplicates.total").increment(1);
                return;
            }
            Ok(CheckOutcome::First) => {}
            Err(error) => {
                // Degraded mode per §4.1: proceed without dedup rather than
                // stall the pipeline on a store outage.
                tracing::warn!(%error, "idempotency store unreachable, proceeding without dedup");
                metrics::counter!("consumer.idempotency_degraded.total").increment(1);
            }
        }

        let routing_key = envelope.routing_key;
        match dispatch_with_window(
            &*self.notification_store,
            &*self.followers,
            &*self.notify,
            &envelope,
            self.aggregate_window,
        )
        .await
        {
            Ok(()) => {
                metrics::counter!("consumer.handled.total", "routing_key" => routing_key.as_str())
                    .increment(1);
            }
            Err(DispatchError::Validation(error)) => {
                tracing::warn!(%error, routing_key = routing_key.as_str(), "dropping invalid event");
                metrics::counter!("consumer.validation_errors.total").increment(1);
            }
            Err(DispatchError::Transient(error)) => {
                tracing::error!(%error, routing_key = routing_key.as_str(), "handler failed, releasing dedup key for redrive");
                metrics::counter!("consumer.transient_errors.total").increment(1);
                if let Err(remove_error) = self
                    .idempotency_store
                    .remove(DEDUP_NAMESPACE, &dedup_key)
                    .await
                {
                    tracing::error!(%remove_error, "failed to release dedup key after transient error");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::RoutingKey;
    use composable_rust_core::event::SerializedEvent;

    #[test]
    fn events_topic_is_stable() {
        assert_eq!(EVENTS_TOPIC, "social.events");
    }

    #[test]
    fn unknown_routing_key_round_trips_through_serialized_event() {
        let raw = SerializedEvent::new("not.a.key".to_string(), b"{}".to_vec(), None);
        let result = EventEnvelope::from_serialized(&raw);
        assert!(result.is_err());
    }

    #[test]
    fn known_routing_key_parses() {
        let raw = SerializedEvent::new(
            RoutingKey::PostLiked.as_str().to_string(),
            serde_json::to_vec(&serde_json::json!({"post_owner": "u1", "liker": "u2", "post_id": "p1"}))
                .unwrap(),
            None,
        );
        let envelope = EventEnvelope::from_serialized(&raw).expect("parse");
        assert_eq!(envelope.routing_key, RoutingKey::PostLiked);
    }
}
