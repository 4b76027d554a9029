//! In-memory fakes for the fabric's capability traits.
//!
//! Mirrors [`crate::projection_mocks`]'s `HashMap`-behind-a-lock shape, one
//! fake per trait in [`composable_rust_core`], so integration tests can
//! exercise the consumer/outbox/rtmp code paths without a live Postgres,
//! Redis, or Kafka.

use composable_rust_core::event::SerializedEvent;
use composable_rust_core::event_bus::{EventBus, EventBusError, EventStream};
use composable_rust_core::idempotency_store::{CheckOutcome, IdempotencyStore, IdempotencyStoreError};
use composable_rust_core::notification_store::{
    AggregationOutcome, Notification, NotificationStore, NotificationStoreError, Pagination,
};
use composable_rust_core::outbox_store::{OutboxEntry, OutboxStatus, OutboxStore, OutboxStoreError};
use composable_rust_core::rtmp_store::{
    PublishOutcome, RtmpSession, RtmpSessionStore, RtmpStatus, RtmpStoreError,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// In-memory [`NotificationStore`], keyed by auto-incrementing id.
#[derive(Default)]
pub struct InMemoryNotificationStore {
    rows: Mutex<HashMap<i64, Notification>>,
    next_id: AtomicI64,
}

impl InMemoryNotificationStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every notification currently held, for test assertions.
    #[must_use]
    pub fn all(&self) -> Vec<Notification> {
        self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values().cloned().collect()
    }

    fn insert_row(&self, row: Notification) -> i64 {
        let id = row.id;
        self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, row);
        id
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn create(
        &self,
        user_id: &str,
        title_template: &str,
        body_template: &str,
        link_url: Option<&str>,
    ) -> BoxFuture<'_, Result<i64, NotificationStoreError>> {
        let user_id = user_id.to_string();
        let title_template = title_template.to_string();
        let body_template = body_template.to_string();
        let link_url = link_url.map(str::to_string);
        Box::pin(async move {
            let id = self.alloc_id();
            let now = chrono::Utc::now();
            Ok(self.insert_row(Notification {
                id,
                user_id,
                title_template,
                body_template,
                notification_type: None,
                reference_id: None,
                actors_count: 1,
                last_actor_id: None,
                last_actor_name: None,
                is_read: false,
                link_url,
                created_at: now,
                updated_at: now,
            }))
        })
    }

    fn create_many(
        &self,
        user_ids: &[String],
        title_template: &str,
        body_template: &str,
        link_url: Option<&str>,
    ) -> BoxFuture<'_, Result<Vec<i64>, NotificationStoreError>> {
        let user_ids = user_ids.to_vec();
        let title_template = title_template.to_string();
        let body_template = body_template.to_string();
        let link_url = link_url.map(str::to_string);
        Box::pin(async move {
            let mut ids = Vec::with_capacity(user_ids.len());
            for user_id in user_ids {
                ids.push(self.create(&user_id, &title_template, &body_template, link_url.as_deref()).await?);
            }
            Ok(ids)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn create_aggregated(
        &self,
        user_id: &str,
        notification_type: &str,
        reference_id: &str,
        title_template: &str,
        body_template: &str,
        link_url: Option<&str>,
        last_actor_id: &str,
        last_actor_name: &str,
        window: chrono::Duration,
    ) -> BoxFuture<'_, Result<(i64, AggregationOutcome), NotificationStoreError>> {
        let user_id = user_id.to_string();
        let notification_type = notification_type.to_string();
        let reference_id = reference_id.to_string();
        let title_template = title_template.to_string();
        let body_template = body_template.to_string();
        let link_url = link_url.map(str::to_string);
        let last_actor_id = last_actor_id.to_string();
        let last_actor_name = last_actor_name.to_string();
        Box::pin(async move {
            let existing = self
                .find_aggregated(&user_id, &notification_type, &reference_id, window)
                .await?;

            if let Some(prior) = existing {
                let mut guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let row = guard.get_mut(&prior.id).expect("found row must still exist");
                row.actors_count += 1;
                row.last_actor_id = Some(last_actor_id);
                row.last_actor_name = Some(last_actor_name);
                row.body_template = body_template;
                row.updated_at = chrono::Utc::now();
                Ok((
                    prior.id,
                    AggregationOutcome::Incremented { prior_actors_count: prior.actors_count },
                ))
            } else {
                let id = self.alloc_id();
                let now = chrono::Utc::now();
                self.insert_row(Notification {
                    id,
                    user_id,
                    title_template,
                    body_template,
                    notification_type: Some(notification_type),
                    reference_id: Some(reference_id),
                    actors_count: 1,
                    last_actor_id: Some(last_actor_id),
                    last_actor_name: Some(last_actor_name),
                    is_read: false,
                    link_url,
                    created_at: now,
                    updated_at: now,
                });
                Ok((id, AggregationOutcome::Created))
            }
        })
    }

    fn find_by_user(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<Notification>, NotificationStoreError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut rows: Vec<Notification> =
                guard.values().filter(|n| n.user_id == user_id).cloned().collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            #[allow(clippy::cast_sign_loss)]
            let offset = pagination.offset.max(0) as usize;
            #[allow(clippy::cast_sign_loss)]
            let limit = pagination.limit.max(0) as usize;
            Ok(rows.into_iter().skip(offset).take(limit).collect())
        })
    }

    fn find_aggregated(
        &self,
        user_id: &str,
        notification_type: &str,
        reference_id: &str,
        window: chrono::Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, NotificationStoreError>> {
        let user_id = user_id.to_string();
        let notification_type = notification_type.to_string();
        let reference_id = reference_id.to_string();
        Box::pin(async move {
            let cutoff = chrono::Utc::now() - window;
            let guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(guard
                .values()
                .filter(|n| {
                    n.user_id == user_id
                        && n.notification_type.as_deref() == Some(notification_type.as_str())
                        && n.reference_id.as_deref() == Some(reference_id.as_str())
                        && n.created_at >= cutoff
                })
                .max_by_key(|n| n.created_at)
                .cloned())
        })
    }

    fn mark_read(&self, id: i64) -> BoxFuture<'_, Result<(), NotificationStoreError>> {
        Box::pin(async move {
            let mut guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let row = guard.get_mut(&id).ok_or(NotificationStoreError::NotFound(id))?;
            row.is_read = true;
            row.updated_at = chrono::Utc::now();
            Ok(())
        })
    }

    fn delete(&self, id: i64) -> BoxFuture<'_, Result<(), NotificationStoreError>> {
        Box::pin(async move {
            self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
            Ok(())
        })
    }
}

/// In-memory [`IdempotencyStore`].
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    keys: Mutex<HashMap<(String, String), Instant>>,
}

impl InMemoryIdempotencyStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn check_and_mark(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<CheckOutcome, IdempotencyStoreError>> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        Box::pin(async move {
            if key.is_empty() {
                return Err(IdempotencyStoreError::InvalidKey);
            }
            let now = Instant::now();
            let mut guard = self.keys.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let entry_key = (namespace, key);
            if let Some(expires_at) = guard.get(&entry_key) {
                if *expires_at > now {
                    return Ok(CheckOutcome::Duplicate);
                }
            }
            guard.insert(entry_key, now + ttl);
            Ok(CheckOutcome::First)
        })
    }

    fn remove(&self, namespace: &str, key: &str) -> BoxFuture<'_, Result<(), IdempotencyStoreError>> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        Box::pin(async move {
            self.keys
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&(namespace, key));
            Ok(())
        })
    }
}

/// In-memory [`OutboxStore`].
#[derive(Default)]
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxEntry>>,
    next_id: AtomicI64,
}

impl InMemoryOutboxStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn append(
        &self,
        aggregate_id: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, Result<i64, OutboxStoreError>> {
        let aggregate_id = aggregate_id.to_string();
        let routing_key = routing_key.to_string();
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(OutboxEntry {
                id,
                aggregate_id,
                routing_key,
                payload,
                status: OutboxStatus::Pending,
                created_at: chrono::Utc::now(),
            });
            Ok(id)
        })
    }

    fn fetch_pending(&self, batch_size: i64) -> BoxFuture<'_, Result<Vec<OutboxEntry>, OutboxStoreError>> {
        Box::pin(async move {
            #[allow(clippy::cast_sign_loss)]
            let batch_size = batch_size.max(0) as usize;
            let guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(guard
                .iter()
                .filter(|e| e.status == OutboxStatus::Pending)
                .take(batch_size)
                .cloned()
                .collect())
        })
    }

    fn mark_published(&self, id: i64) -> BoxFuture<'_, Result<(), OutboxStoreError>> {
        Box::pin(async move {
            let mut guard = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(row) = guard.iter_mut().find(|e| e.id == id) {
                row.status = OutboxStatus::Published;
            }
            Ok(())
        })
    }
}

/// In-memory [`EventBus`] backed by a [`tokio::sync::broadcast`] channel;
/// every subscriber sees every published event, same as the production
/// Kafka consumer group fan-out this fake stands in for.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<SerializedEvent>,
}

impl InMemoryEventBus {
    /// Create a bus with the given broadcast channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        _topic: &str,
        event: &SerializedEvent,
    ) -> BoxFuture<'_, Result<(), EventBusError>> {
        let event = event.clone();
        Box::pin(async move {
            // No receivers yet is not an error; it mirrors a topic nobody
            // has subscribed to.
            let _ = self.sender.send(event);
            Ok(())
        })
    }

    fn subscribe(&self, _topics: &[&str]) -> BoxFuture<'_, Result<EventStream, EventBusError>> {
        Box::pin(async move {
            let mut receiver = self.sender.subscribe();
            let stream = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(event) => yield Ok(event),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}

/// In-memory [`RtmpSessionStore`], seeded with sessions up front via
/// [`InMemoryRtmpSessionStore::with_session`] the way a migration would seed
/// `rtmp_sessions` rows.
#[derive(Default)]
pub struct InMemoryRtmpSessionStore {
    sessions: Mutex<HashMap<String, RtmpSession>>,
}

impl InMemoryRtmpSessionStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session, builder-style.
    #[must_use]
    pub fn with_session(self, id: &str, stream_key: &str, status: RtmpStatus) -> Self {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(
            id.to_string(),
            RtmpSession {
                id: id.to_string(),
                stream_key: stream_key.to_string(),
                status,
                started_at: None,
                ended_at: None,
                viewer_count: 0,
            },
        );
        self
    }
}

impl RtmpSessionStore for InMemoryRtmpSessionStore {
    fn find(&self, stream_id: &str) -> BoxFuture<'_, Result<Option<RtmpSession>, RtmpStoreError>> {
        let stream_id = stream_id.to_string();
        Box::pin(async move {
            Ok(self
                .sessions
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&stream_id)
                .cloned())
        })
    }

    fn on_publish(
        &self,
        stream_id: &str,
        token: &str,
    ) -> BoxFuture<'_, Result<PublishOutcome, RtmpStoreError>> {
        let stream_id = stream_id.to_string();
        let token = token.to_string();
        Box::pin(async move {
            let mut guard = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let session = guard
                .get_mut(&stream_id)
                .ok_or_else(|| RtmpStoreError::NotFound(stream_id.clone()))?;

            if session.status != RtmpStatus::Idle {
                return Ok(PublishOutcome::InvalidState { current: session.status });
            }
            if session.stream_key != token {
                return Ok(PublishOutcome::TokenMismatch);
            }
            session.status = RtmpStatus::Live;
            session.started_at = Some(chrono::Utc::now());
            Ok(PublishOutcome::Accepted)
        })
    }

    fn on_unpublish(&self, stream_id: &str) -> BoxFuture<'_, Result<(), RtmpStoreError>> {
        let stream_id = stream_id.to_string();
        Box::pin(async move {
            let mut guard = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let session = guard
                .get_mut(&stream_id)
                .ok_or_else(|| RtmpStoreError::NotFound(stream_id.clone()))?;
            if session.status == RtmpStatus::Live {
                session.status = RtmpStatus::Ended;
                session.ended_at = Some(chrono::Utc::now());
                session.viewer_count = 0;
            }
            Ok(())
        })
    }
}

/// Wrap any `Arc<T>` fake so it can be shared across a test's setup and its
/// assertions without the test owning two handles of mismatched type.
#[must_use]
pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notification_store_create_then_find_by_user_round_trips() {
        let store = InMemoryNotificationStore::new();
        let id = store.create("u1", "Title", "Body", None).await.unwrap();
        let found = store.find_by_user("u1", Pagination::first(10)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
    }

    #[tokio::test]
    async fn notification_store_aggregates_within_window() {
        let store = InMemoryNotificationStore::new();
        let window = chrono::Duration::hours(24);
        let (id1, outcome1) = store
            .create_aggregated("owner", "post_liked", "p1", "New Like", "A liked your post", None, "a", "A", window)
            .await
            .unwrap();
        assert_eq!(outcome1, AggregationOutcome::Created);

        let (id2, outcome2) = store
            .create_aggregated(
                "owner", "post_liked", "p1", "New Like", "B and 1 others liked your post", None, "b", "B", window,
            )
            .await
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(outcome2, AggregationOutcome::Incremented { prior_actors_count: 1 });
    }

    #[tokio::test]
    async fn idempotency_store_marks_duplicates() {
        let store = InMemoryIdempotencyStore::new();
        let first = store.check_and_mark("ns", "k1", Duration::from_secs(60)).await.unwrap();
        let second = store.check_and_mark("ns", "k1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(first, CheckOutcome::First);
        assert_eq!(second, CheckOutcome::Duplicate);
    }

    #[tokio::test]
    async fn idempotency_store_rejects_empty_key() {
        let store = InMemoryIdempotencyStore::new();
        let result = store.check_and_mark("ns", "", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(IdempotencyStoreError::InvalidKey)));
    }

    #[tokio::test]
    async fn outbox_store_fetch_pending_excludes_published() {
        let store = InMemoryOutboxStore::new();
        let id = store.append("agg1", "post.liked", serde_json::json!({})).await.unwrap();
        store.mark_published(id).await.unwrap();
        let pending = store.fetch_pending(10).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn event_bus_delivers_published_events_to_subscriber() {
        use futures::StreamExt;
        let bus = InMemoryEventBus::new(8);
        let mut stream = bus.subscribe(&["social.events"]).await.unwrap();
        bus.publish("social.events", &SerializedEvent::new("post.liked".to_string(), b"{}".to_vec(), None))
            .await
            .unwrap();
        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.event_type, "post.liked");
    }

    #[tokio::test]
    async fn rtmp_store_accepts_matching_token_from_idle() {
        let store = InMemoryRtmpSessionStore::new().with_session("5", "tok", RtmpStatus::Idle);
        let outcome = store.on_publish("5", "tok").await.unwrap();
        assert_eq!(outcome, PublishOutcome::Accepted);
        let session = store.find("5").await.unwrap().unwrap();
        assert_eq!(session.status, RtmpStatus::Live);
        assert!(session.started_at.is_some());
    }

    #[tokio::test]
    async fn rtmp_store_rejects_mismatched_token() {
        let store = InMemoryRtmpSessionStore::new().with_session("5", "tok", RtmpStatus::Idle);
        let outcome = store.on_publish("5", "wrong").await.unwrap();
        assert_eq!(outcome, PublishOutcome::TokenMismatch);
    }

    #[tokio::test]
    async fn rtmp_store_rejects_publish_on_already_live_session() {
        let store = InMemoryRtmpSessionStore::new().with_session("5", "tok", RtmpStatus::Live);
        let outcome = store.on_publish("5", "tok").await.unwrap();
        assert_eq!(outcome, PublishOutcome::InvalidState { current: RtmpStatus::Live });
    }

    #[tokio::test]
    async fn rtmp_store_unpublish_is_idempotent() {
        let store = InMemoryRtmpSessionStore::new().with_session("5", "tok", RtmpStatus::Live);
        store.on_unpublish("5").await.unwrap();
        store.on_unpublish("5").await.unwrap();
        let session = store.find("5").await.unwrap().unwrap();
        assert_eq!(session.status, RtmpStatus::Ended);
    }
}
