//! Server→client notification push frame (`spec.md` §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The frame a notification publish becomes once it reaches a client socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPushFrame {
    /// One of the consumer's routing keys, or `connection.failed` (emitted
    /// client-side by the reconnector, never by this gateway).
    pub event_type: String,
    /// Recipients this frame was addressed to.
    pub user_ids: Vec<String>,
    /// The rendered notification content.
    pub payload: NotificationPayload,
}

/// The `payload` object of a [`NotificationPushFrame`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Rendered title.
    pub title: String,
    /// Rendered body.
    pub body: String,
    /// Deep link, if any.
    pub link: Option<String>,
    /// Creation timestamp.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}
