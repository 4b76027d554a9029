//! Publish side of the cross-instance router: the channel producers (chiefly
//! the Notification Store's post-commit side effect, §4.2) use to reach any
//! user on any gateway instance.

use crate::gateway::NotificationPushFrame;
use redis::AsyncCommands;
use redis::aio::ConnectionManager as RedisConnectionManager;
use thiserror::Error;

/// Errors publishing a frame to the router.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The underlying Redis connection failed.
    #[error("router publish failed: {0}")]
    Redis(#[from] redis::RedisError),
    /// The frame could not be serialized.
    #[error("router publish failed to serialize frame: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The logical broadcast channel every subscriber listens on.
pub const BROADCAST_CHANNEL: &str = "ws:broadcast";

/// The per-user channel name for `user_id`.
#[must_use]
pub fn user_channel(user_id: &str) -> String {
    format!("ws:user:{user_id}")
}

/// Thin publisher wrapping a `redis::aio::ConnectionManager`, which handles
/// its own reconnection so producers do not need their own backoff loop —
/// only the Subscriber's receive side needs [`super::backoff::ReconnectBackoff`].
#[derive(Clone)]
pub struct Publisher {
    connection: RedisConnectionManager,
}

impl Publisher {
    /// Wrap an already-established Redis connection manager.
    #[must_use]
    pub fn new(connection: RedisConnectionManager) -> Self {
        Self { connection }
    }

    /// Publish `frame` to every connection `user_id` holds, on whichever
    /// gateway instance(s) they are connected to.
    ///
    /// Failure is logged by the caller, not propagated as a transaction
    /// failure (§4.2: "Failure of the publish is logged, not propagated").
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] on serialization or transport failure.
    pub async fn publish_to_user(
        &self,
        user_id: &str,
        frame: &NotificationPushFrame,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_string(frame)?;
        let mut connection = self.connection.clone();
        connection.publish::<_, _, ()>(user_channel(user_id), payload).await?;
        Ok(())
    }

    /// Publish `frame` to every connection on every instance.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] on serialization or transport failure.
    pub async fn publish_broadcast(&self, frame: &NotificationPushFrame) -> Result<(), PublishError> {
        let payload = serde_json::to_string(frame)?;
        let mut connection = self.connection.clone();
        connection.publish::<_, _, ()>(BROADCAST_CHANNEL, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_channel_has_expected_shape() {
        assert_eq!(user_channel("u1"), "ws:user:u1");
    }
}
