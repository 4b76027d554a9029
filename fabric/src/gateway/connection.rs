//! `Connection` and `ConnectionManager` (`spec.md` §3/§4.3/§5).

use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, RwLock, mpsc};
use uuid::Uuid;

/// Opaque identifier for one accepted socket.
pub type ConnectionId = Uuid;

/// A single accepted WebSocket connection.
///
/// Only the write pump touches the socket for writes and only the read pump
/// touches it for reads (§4.3); this struct is the handle the rest of the
/// gateway uses to reach a connection without touching the socket directly.
/// The pump tasks themselves are owned by a reaper task spawned alongside
/// this handle (see `gateway::handler`), not by the handle — that reaper is
/// what lets a connection reap itself from the manager on a natural
/// disconnect, not only on a manager-initiated shutdown.
pub struct Connection {
    id: ConnectionId,
    user_id: String,
    sender: mpsc::Sender<Message>,
    close: Arc<Notify>,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
}

impl Connection {
    /// Construct a connection handle. `close` signals the write pump to emit
    /// a close frame and exit; `exited`/`exit_notify` are flipped by the
    /// reaper task once both pumps have actually exited.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        user_id: String,
        sender: mpsc::Sender<Message>,
        close: Arc<Notify>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) -> Self {
        Self {
            id,
            user_id,
            sender,
            close,
            exited,
            exit_notify,
        }
    }

    /// This connection's id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// The user this connection belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Enqueue a frame for delivery. Drops the frame (rather than block) if
    /// the send queue is full — the Subscriber/gateway's single coroutine
    /// must never stall behind a slow client (§4.4).
    ///
    /// Returns `false` if the frame was dropped.
    pub fn try_enqueue(&self, message: Message) -> bool {
        self.sender.try_send(message).is_ok()
    }

    /// Signal the write pump to emit a close frame and exit.
    pub fn signal_close(&self) {
        self.close.notify_one();
    }

    /// Wait for both pump tasks to exit, matching `removeAndWait`'s "blocks
    /// until both pumps exit" contract.
    ///
    /// Safe against the notify-before-wait race: the `Notified` future is
    /// created before the flag is checked, so a notification delivered
    /// between those two steps is still observed.
    pub async fn wait_for_exit(&self) {
        let notified = self.exit_notify.notified();
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// Mapping from `user_id` to the set of connections that user currently
/// holds open on this process, plus a live cardinality counter.
#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<String, HashMap<ConnectionId, Connection>>>,
    count: AtomicUsize,
}

impl ConnectionManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly-accepted connection.
    pub async fn add(&self, connection: Connection) {
        let user_id = connection.user_id().to_string();
        let mut guard = self.connections.write().await;
        guard.entry(user_id).or_default().insert(connection.id(), connection);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove a connection without waiting for its pumps to exit. Idempotent.
    pub async fn remove(&self, user_id: &str, id: ConnectionId) {
        let mut guard = self.connections.write().await;
        if let Some(user_connections) = guard.get_mut(user_id) {
            if user_connections.remove(&id).is_some() {
                self.count.fetch_sub(1, Ordering::SeqCst);
            }
            if user_connections.is_empty() {
                guard.remove(user_id);
            }
        }
    }

    /// Remove a connection and block until both of its pump tasks exit.
    /// Releases the manager's lock before awaiting, per §5's discipline.
    pub async fn remove_and_wait(&self, user_id: &str, id: ConnectionId) {
        let connection = {
            let mut guard = self.connections.write().await;
            let removed = guard
                .get_mut(user_id)
                .and_then(|user_connections| user_connections.remove(&id));
            if removed.is_some() {
                self.count.fetch_sub(1, Ordering::SeqCst);
            }
            if guard.get(user_id).is_some_and(HashMap::is_empty) {
                guard.remove(user_id);
            }
            removed
        };
        if let Some(connection) = connection {
            connection.signal_close();
            connection.wait_for_exit().await;
        }
    }

    /// Total connections across all users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Enqueue `message` into every connection currently held by `user_id`.
    /// Connections whose send queue is full are dropped and scheduled for
    /// removal (§4.4).
    pub async fn for_each(&self, user_id: &str, message: &Message) {
        let mut dropped = Vec::new();
        {
            let guard = self.connections.read().await;
            if let Some(user_connections) = guard.get(user_id) {
                for connection in user_connections.values() {
                    if !connection.try_enqueue(message.clone()) {
                        dropped.push(connection.id());
                    }
                }
            }
        }
        for id in dropped {
            tracing::warn!(user_id, connection_id = %id, "send queue full, dropping connection");
            self.remove(user_id, id).await;
        }
    }

    /// Enqueue `message` into every connection on this process, regardless
    /// of owning user — backs the `ws:broadcast` channel.
    pub async fn broadcast(&self, message: &Message) {
        let mut dropped = Vec::new();
        {
            let guard = self.connections.read().await;
            for (user_id, user_connections) in guard.iter() {
                for connection in user_connections.values() {
                    if !connection.try_enqueue(message.clone()) {
                        dropped.push((user_id.clone(), connection.id()));
                    }
                }
            }
        }
        for (user_id, id) in dropped {
            tracing::warn!(user_id, connection_id = %id, "send queue full during broadcast, dropping connection");
            self.remove(&user_id, id).await;
        }
    }

    /// Snapshot of every `(user_id, connection_id)` pair currently held,
    /// used to enumerate connections during graceful shutdown.
    pub async fn all_connections(&self) -> Vec<(String, ConnectionId)> {
        let guard = self.connections.read().await;
        guard
            .iter()
            .flat_map(|(user_id, conns)| conns.keys().map(move |id| (user_id.clone(), *id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (Arc<Notify>, Arc<AtomicBool>, Arc<Notify>) {
        (Arc::new(Notify::new()), Arc::new(AtomicBool::new(false)), Arc::new(Notify::new()))
    }

    #[tokio::test]
    async fn add_then_count_reflects_one_connection() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::channel(8);
        let (close, exited, exit_notify) = handle();
        let connection = Connection::new(Uuid::new_v4(), "u1".to_string(), tx, close, exited, exit_notify);
        manager.add(connection).await;
        assert_eq!(manager.count(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        manager.remove("nobody", id).await;
        manager.remove("nobody", id).await;
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn remove_and_wait_drains_to_zero_once_exited() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::channel(8);
        let (close, exited, exit_notify) = handle();
        exited.store(true, Ordering::SeqCst); // pumps already finished
        let id = Uuid::new_v4();
        let connection = Connection::new(id, "u2".to_string(), tx, close, exited, exit_notify);
        manager.add(connection).await;
        manager.remove_and_wait("u2", id).await;
        assert_eq!(manager.count(), 0);
        assert!(manager.all_connections().await.is_empty());
    }

    #[tokio::test]
    async fn for_each_drops_connection_on_full_queue() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx); // simulate a queue whose receiver is gone, so sends fail
        let (close, exited, exit_notify) = handle();
        let id = Uuid::new_v4();
        let connection = Connection::new(id, "u3".to_string(), tx, close, exited, exit_notify);
        manager.add(connection).await;
        manager.for_each("u3", &Message::Text("hi".to_string())).await;
        assert_eq!(manager.count(), 0);
    }
}
