//! `/ws` upgrade handler: wires one accepted socket into its pump tasks and
//! the shared [`ConnectionManager`].

use super::auth::AuthenticatedUserId;
use super::connection::Connection;
use super::pump::{read_pump, write_pump};
use crate::config::WebSocketConfig;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, Notify, mpsc};
use uuid::Uuid;

use super::connection::ConnectionManager;

/// Shared state the gateway's axum routes run against.
#[derive(Clone)]
pub struct GatewayState {
    /// The process-local connection registry.
    pub connections: Arc<ConnectionManager>,
    /// Protocol parameters (queue capacity, ping/pong timing, deadlines).
    pub config: WebSocketConfig,
    /// Gate closed during graceful shutdown so new upgrades are rejected
    /// before existing connections are drained.
    pub accepting: Arc<AtomicBool>,
}

impl GatewayState {
    /// Construct gateway state accepting new upgrades.
    #[must_use]
    pub fn new(connections: Arc<ConnectionManager>, config: WebSocketConfig) -> Self {
        Self {
            connections,
            config,
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stop accepting new upgrades (first step of graceful shutdown, §5).
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}

/// `GET /ws` — upgrade handler.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    AuthenticatedUserId(user_id): AuthenticatedUserId,
    State(state): State<GatewayState>,
) -> Response {
    if !state.accepting.load(Ordering::SeqCst) {
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let config = state.config.clone();
    ws.max_message_size(config.read_limit_bytes)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            let (tx, rx) = mpsc::channel(config.send_queue_capacity);
            let close = Arc::new(Notify::new());
            let last_pong = Arc::new(Mutex::new(Instant::now()));
            let id = Uuid::new_v4();
            let exited = Arc::new(AtomicBool::new(false));
            let exit_notify = Arc::new(Notify::new());

            let read_handle = tokio::spawn(read_pump(stream, last_pong.clone(), close.clone()));
            let write_handle = tokio::spawn(write_pump(sink, rx, close.clone(), last_pong, config));

            let connections = state.connections.clone();
            let reaper_user_id = user_id.clone();
            let reaper_exited = exited.clone();
            let reaper_exit_notify = exit_notify.clone();
            tokio::spawn(async move {
                let _ = tokio::join!(read_handle, write_handle);
                connections.remove(&reaper_user_id, id).await;
                reaper_exited.store(true, Ordering::SeqCst);
                reaper_exit_notify.notify_waiters();
            });

            let connection = Connection::new(id, user_id.clone(), tx, close, exited, exit_notify);
            state.connections.add(connection).await;
            tracing::info!(user_id, connection_id = %id, "websocket connection established");
        })
}
