//! Chat protocol frames (`spec.md` §4.7/§6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound client→server frame. The only inbound type this hub accepts.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundChatFrame {
    /// A chat message; truncated to `max_msg_chars` before broadcast.
    Chat {
        /// Raw message content as sent by the client.
        content: String,
    },
}

/// Server→client frames for `/ws/live/{stream_id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundChatFrame {
    /// Sent once to a client immediately after it joins.
    Joined {
        /// The room it joined.
        stream_id: String,
        /// Viewer count at join time.
        count: usize,
    },
    /// Broadcast to the room on join/leave churn, throttled to at most once
    /// every `view_update_throttle_s`.
    ViewUpdate {
        /// The room this count belongs to.
        stream_id: String,
        /// Current viewer count.
        count: usize,
    },
    /// A `CHAT` frame re-broadcast with server-stamped identity and time.
    ChatBroadcast {
        /// The sender's user id.
        user_id: String,
        /// The sender's display name.
        username: String,
        /// The room this message was posted in.
        stream_id: String,
        /// Truncated, server-accepted content.
        content: String,
        /// Server receive time.
        timestamp: DateTime<Utc>,
    },
    /// Sent to the room when a client leaves (before the resulting
    /// `ViewUpdate`, so recipients can attribute the count change).
    Left {
        /// The room the client left.
        stream_id: String,
        /// The user id that left.
        user_id: String,
    },
    /// Sent immediately before the server closes the connection.
    Error {
        /// Machine-readable reason, e.g. `"rate_limited"`.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

/// Maximum chat message length enforced server-side (`spec.md` §4.7).
pub const MAX_MSG_CHARS_DEFAULT: usize = 500;

/// Truncate `content` to at most `max_chars` Unicode scalar values.
#[must_use]
pub fn truncate(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries_not_bytes() {
        let content = "é".repeat(600);
        let truncated = truncate(&content, 500);
        assert_eq!(truncated.chars().count(), 500);
    }

    #[test]
    fn truncate_is_a_no_op_under_the_limit() {
        assert_eq!(truncate("hi", 500), "hi");
    }

    #[test]
    fn inbound_chat_frame_parses_from_json() {
        let json = r#"{"type":"CHAT","content":"hello"}"#;
        let frame: InboundChatFrame = serde_json::from_str(json).expect("should parse");
        let InboundChatFrame::Chat { content } = frame;
        assert_eq!(content, "hello");
    }
}
