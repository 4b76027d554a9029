//! `ChatRoom` and its process-local registry (`spec.md` §3/§4.7).
//!
//! Mirrors [`crate::gateway::connection`]'s discipline: one lock guards the
//! client map, writers never block on a downstream send, and the registry
//! creates a room on first join and tears it down when it empties.

use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use super::frame::OutboundChatFrame;

struct ChatClient {
    user_id: String,
    username: String,
    sender: mpsc::Sender<Message>,
}

/// All clients currently watching one `stream_id`, plus the view-update
/// throttle state for that room.
pub struct ChatRoom {
    stream_id: String,
    clients: RwLock<HashMap<Uuid, ChatClient>>,
    last_view_update: Mutex<Option<Instant>>,
    view_update_throttle: Duration,
}

impl ChatRoom {
    /// An empty room for `stream_id`.
    #[must_use]
    pub fn new(stream_id: String, view_update_throttle: Duration) -> Self {
        Self {
            stream_id,
            clients: RwLock::new(HashMap::new()),
            last_view_update: Mutex::new(None),
            view_update_throttle,
        }
    }

    /// Current viewer count.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Register a newly-joined client. Returns the viewer count immediately
    /// after joining, for the `Joined` frame the caller sends back to just
    /// this client.
    pub async fn join(&self, id: Uuid, user_id: String, username: String, sender: mpsc::Sender<Message>) -> usize {
        let mut guard = self.clients.write().await;
        guard.insert(id, ChatClient { user_id, username, sender });
        guard.len()
    }

    /// Remove a client. Returns its `user_id` and the resulting viewer count
    /// if it was present.
    pub async fn leave(&self, id: Uuid) -> Option<(String, usize)> {
        let mut guard = self.clients.write().await;
        let client = guard.remove(&id)?;
        Some((client.user_id, guard.len()))
    }

    /// Enqueue `frame` to every client in the room. Connections whose send
    /// queue is full are silently dropped (the gateway's own reaper will
    /// notice the dead socket and call `leave`).
    pub async fn broadcast(&self, frame: &OutboundChatFrame) {
        let Ok(text) = serde_json::to_string(frame) else {
            tracing::error!(stream_id = %self.stream_id, "failed to serialize chat frame");
            return;
        };
        let message = Message::Text(text);
        let guard = self.clients.read().await;
        for client in guard.values() {
            let _ = client.sender.try_send(message.clone());
        }
    }

    /// Send `frame` to exactly one client.
    pub async fn send_to(&self, id: Uuid, frame: &OutboundChatFrame) {
        let Ok(text) = serde_json::to_string(frame) else {
            tracing::error!(stream_id = %self.stream_id, "failed to serialize chat frame");
            return;
        };
        let guard = self.clients.read().await;
        if let Some(client) = guard.get(&id) {
            let _ = client.sender.try_send(Message::Text(text));
        }
    }

    /// Broadcast a `ViewUpdate` if at least `view_update_throttle` has
    /// elapsed since the last one; otherwise a no-op. Returns whether a
    /// broadcast was sent.
    pub async fn maybe_broadcast_view_update(&self) -> bool {
        let mut last = self.last_view_update.lock().await;
        let now = Instant::now();
        if last.is_some_and(|t| now.duration_since(t) < self.view_update_throttle) {
            return false;
        }
        *last = Some(now);
        drop(last);
        let count = self.count().await;
        self.broadcast(&OutboundChatFrame::ViewUpdate {
            stream_id: self.stream_id.clone(),
            count,
        })
        .await;
        true
    }

    /// A client's display name, looked up for stamping outbound `CHAT_BROADCAST` frames.
    pub async fn username_of(&self, id: Uuid) -> Option<String> {
        self.clients.read().await.get(&id).map(|c| c.username.clone())
    }
}

/// Process-local registry of active chat rooms, one per live `stream_id`.
#[derive(Default)]
pub struct ChatRoomRegistry {
    rooms: RwLock<HashMap<String, Arc<ChatRoom>>>,
}

impl ChatRoomRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the room for `stream_id`, creating it if this is the first join.
    pub async fn get_or_create(&self, stream_id: &str, view_update_throttle: Duration) -> Arc<ChatRoom> {
        if let Some(room) = self.rooms.read().await.get(stream_id) {
            return Arc::clone(room);
        }
        let mut guard = self.rooms.write().await;
        Arc::clone(
            guard
                .entry(stream_id.to_string())
                .or_insert_with(|| Arc::new(ChatRoom::new(stream_id.to_string(), view_update_throttle))),
        )
    }

    /// Remove `stream_id`'s room if it has become empty. Safe to call after
    /// every `leave`; a non-empty room is left untouched.
    pub async fn remove_if_empty(&self, stream_id: &str) {
        let mut guard = self.rooms.write().await;
        let Some(room) = guard.get(stream_id) else { return };
        if room.count().await == 0 {
            guard.remove(stream_id);
            tracing::debug!(stream_id, "chat room emptied, removing");
        }
    }

    /// Total rooms currently tracked, for metrics.
    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_then_leave_tracks_count() {
        let room = ChatRoom::new("s1".to_string(), Duration::from_secs(3));
        let (tx, _rx) = mpsc::channel(8);
        let id = Uuid::new_v4();
        let count = room.join(id, "u1".to_string(), "Alice".to_string(), tx).await;
        assert_eq!(count, 1);

        let (user_id, count) = room.leave(id).await.expect("client should have been present");
        assert_eq!(user_id, "u1");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn view_update_is_throttled() {
        let room = ChatRoom::new("s1".to_string(), Duration::from_secs(60));
        let (tx, _rx) = mpsc::channel(8);
        room.join(Uuid::new_v4(), "u1".to_string(), "Alice".to_string(), tx).await;

        assert!(room.maybe_broadcast_view_update().await);
        assert!(!room.maybe_broadcast_view_update().await);
    }

    #[tokio::test]
    async fn registry_creates_on_first_join_and_removes_when_empty() {
        let registry = ChatRoomRegistry::new();
        let room = registry.get_or_create("s1", Duration::from_secs(3)).await;
        let (tx, _rx) = mpsc::channel(8);
        let id = Uuid::new_v4();
        room.join(id, "u1".to_string(), "Alice".to_string(), tx).await;
        assert_eq!(registry.count().await, 1);

        room.leave(id).await;
        registry.remove_if_empty("s1").await;
        assert_eq!(registry.count().await, 0);
    }
}
