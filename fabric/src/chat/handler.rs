//! `/ws/live/{stream_id}` upgrade handler and its dual-pump lifecycle.
//!
//! Deliberately bespoke rather than reusing [`crate::gateway`]'s pumps: that
//! gateway never accepts application-level client→server frames, while this
//! hub's entire purpose is processing inbound `CHAT` frames, so the read
//! side needs real parsing, truncation and rate limiting instead of a
//! liveness-only loop.

use super::frame::{InboundChatFrame, OutboundChatFrame, truncate};
use super::rate_limit::SlidingWindowLimiter;
use super::room::ChatRoomRegistry;
use crate::config::ChatConfig;
use crate::gateway::AuthenticatedUserId;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Shared state for the chat hub's routes.
#[derive(Clone)]
pub struct ChatState {
    /// Process-local room registry.
    pub rooms: Arc<ChatRoomRegistry>,
    /// Shared rate limiter, keyed by connection id.
    pub limiter: Arc<SlidingWindowLimiter>,
    /// Chat protocol parameters (throttle, max length, rate limit).
    pub config: ChatConfig,
}

impl ChatState {
    /// Wire chat state from its registry and configuration.
    #[must_use]
    pub fn new(rooms: Arc<ChatRoomRegistry>, config: ChatConfig) -> Self {
        let limiter = Arc::new(SlidingWindowLimiter::new(config.rate_limit_per_s));
        Self { rooms, limiter, config }
    }
}

#[derive(Debug, Deserialize)]
struct UsernameQuery {
    username: Option<String>,
}

/// `GET /ws/live/{stream_id}` — upgrade handler.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    Path(stream_id): Path<String>,
    AuthenticatedUserId(user_id): AuthenticatedUserId,
    Query(query): Query<UsernameQuery>,
    State(state): State<ChatState>,
) -> Response {
    let username = query.username.filter(|s| !s.is_empty()).unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| async move {
        run_connection(socket, state, stream_id, user_id, username).await;
    })
    .into_response()
}

async fn run_connection(socket: WebSocket, state: ChatState, stream_id: String, user_id: String, username: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.rate_limit_per_s.max(1) as usize * 4);
    let id = Uuid::new_v4();
    let connection_key = id.to_string();

    let view_update_throttle = std::time::Duration::from_secs(state.config.view_update_throttle_s);
    let room = state.rooms.get_or_create(&stream_id, view_update_throttle).await;
    let count = room.join(id, user_id.clone(), username.clone(), tx.clone()).await;

    room.send_to(
        id,
        &OutboundChatFrame::Joined {
            stream_id: stream_id.clone(),
            count,
        },
    )
    .await;
    room.maybe_broadcast_view_update().await;

    tracing::info!(stream_id, user_id, connection_id = %id, "chat client joined");

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };

        if !state.limiter.check_message(&connection_key) {
            room.send_to(
                id,
                &OutboundChatFrame::Error {
                    code: "rate_limited".to_string(),
                    message: "too many chat messages, disconnecting".to_string(),
                },
            )
            .await;
            tracing::warn!(stream_id, user_id, connection_id = %id, "chat rate limit exceeded, closing connection");
            break;
        }

        match serde_json::from_str::<InboundChatFrame>(&text) {
            Ok(InboundChatFrame::Chat { content }) => {
                let content = truncate(&content, state.config.max_msg_chars);
                room.broadcast(&OutboundChatFrame::ChatBroadcast {
                    user_id: user_id.clone(),
                    username: username.clone(),
                    stream_id: stream_id.clone(),
                    content,
                    timestamp: Utc::now(),
                })
                .await;
            }
            Err(error) => {
                tracing::debug!(%error, stream_id, user_id, "dropping unparseable chat frame");
            }
        }
    }

    write_task.abort();
    state.limiter.forget(&connection_key);
    if let Some((left_user_id, _count)) = room.leave(id).await {
        room.broadcast(&OutboundChatFrame::Left {
            stream_id: stream_id.clone(),
            user_id: left_user_id,
        })
        .await;
        room.maybe_broadcast_view_update().await;
    }
    state.rooms.remove_if_empty(&stream_id).await;
    tracing::info!(stream_id, user_id, connection_id = %id, "chat client left");
}
