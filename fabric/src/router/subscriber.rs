//! Subscribe side of the cross-instance router (`spec.md` §4.4).
//!
//! A single per-process Subscriber pattern-subscribes to `ws:user:*` and
//! subscribes to `ws:broadcast`; on receipt it asks the local
//! `ConnectionManager` for the target user's connections and enqueues the
//! frame into each of their send queues.

use super::backoff::ReconnectBackoff;
use super::publisher::BROADCAST_CHANNEL;
use crate::gateway::ConnectionManager;
use axum::extract::ws::Message;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;

const USER_PATTERN: &str = "ws:user:*";

/// Errors from one subscribe-and-serve attempt. Every variant is treated as
/// transient by [`Subscriber::run`] and triggers a reconnect with backoff.
#[derive(Debug, Error)]
enum RunError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Owns the reconnect loop and routes incoming pub/sub frames to local
/// connections.
pub struct Subscriber {
    redis_url: String,
    connections: Arc<ConnectionManager>,
}

impl Subscriber {
    /// Build a subscriber that will connect to `redis_url` and route
    /// incoming frames through `connections`.
    #[must_use]
    pub fn new(redis_url: impl Into<String>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            redis_url: redis_url.into(),
            connections,
        }
    }

    /// Run the subscribe loop until `shutdown` fires. Reconnects with
    /// [`ReconnectBackoff`] on any transport error; resets the backoff after
    /// a subscription that ran long enough to be considered stable.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut backoff = ReconnectBackoff::new();
        loop {
            let started = tokio::time::Instant::now();
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("cross-instance router shutting down");
                    return;
                }
                result = self.run_once(&mut shutdown) => {
                    match result {
                        Ok(()) => return,
                        Err(error) => {
                            tracing::error!(%error, "router subscription lost, reconnecting");
                            metrics::counter!("router.reconnects.total").increment(1);
                            if started.elapsed() > std::time::Duration::from_secs(60) {
                                backoff.reset();
                            }
                            let delay = backoff.next_delay();
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                _ = shutdown.recv() => { return; }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Returns `Ok(())` only if `shutdown` fired mid-subscription; any
    /// transport failure surfaces as `Err`.
    async fn run_once(&self, shutdown: &mut tokio::sync::broadcast::Receiver<()>) -> Result<(), RunError> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(USER_PATTERN).await?;
        pubsub.subscribe(BROADCAST_CHANNEL).await?;
        tracing::info!("router subscriber connected");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                next = stream.next() => {
                    match next {
                        Some(message) => self.handle_message(&message).await,
                        None => return Err(RunError::Redis(redis::RedisError::from((
                            redis::ErrorKind::IoError,
                            "pub/sub stream ended",
                        )))),
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: &redis::Msg) {
        let channel = message.get_channel_name();
        let Ok(payload) = message.get_payload::<String>() else {
            tracing::warn!(channel, "router message payload was not valid UTF-8");
            return;
        };

        if channel == BROADCAST_CHANNEL {
            self.connections.broadcast(&Message::Text(payload)).await;
            return;
        }

        let Some(user_id) = channel.strip_prefix("ws:user:") else {
            tracing::warn!(channel, "router message on unrecognized channel");
            return;
        };
        self.connections.for_each(user_id, &Message::Text(payload)).await;
    }
}
