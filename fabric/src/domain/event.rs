//! The domain event envelope and the closed set of routing keys it carries.
//!
//! `social.events` is bound to a single Kafka-compatible topic (see
//! [`composable_rust_redpanda::RedpandaEventBus`]); AMQP-style exchange
//! routing keys have no native counterpart there, so they travel inside the
//! envelope instead and dispatch happens in-process. See `DESIGN.md` for the
//! full rationale.

use composable_rust_core::event::SerializedEvent;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// The closed set of routing keys the consumer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKey {
    /// A new post was created; fans out to the author's followers.
    PostCreated,
    /// Someone liked a post; aggregates per `(owner, post_liked, post_id)`.
    PostLiked,
    /// Someone commented on a post; aggregates per `(owner, post_commented, post_id)`.
    PostCommented,
    /// Someone replied to a comment.
    CommentReplied,
    /// Someone followed a user.
    UserFollowed,
    /// A user joined a community.
    CommunityJoined,
    /// A moderation violation was detected (from the livestream monitor).
    ViolationEvents,
}

impl RoutingKey {
    /// The wire string for this routing key, e.g. `"post.liked"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PostCreated => "post.created",
            Self::PostLiked => "post.liked",
            Self::PostCommented => "post.commented",
            Self::CommentReplied => "comment.replied",
            Self::UserFollowed => "user.followed",
            Self::CommunityJoined => "community.joined",
            Self::ViolationEvents => "violation.events",
        }
    }

    /// The `notification_type` column value used to key aggregation for
    /// this routing key, when it is aggregatable.
    #[must_use]
    pub const fn notification_type(self) -> Option<&'static str> {
        match self {
            Self::PostLiked => Some("post_liked"),
            Self::PostCommented => Some("post_commented"),
            _ => None,
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`RoutingKey`] from its wire string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown routing key: {0}")]
pub struct UnknownRoutingKey(pub String);

impl std::str::FromStr for RoutingKey {
    type Err = UnknownRoutingKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "post.created" => Self::PostCreated,
            "post.liked" => Self::PostLiked,
            "post.commented" => Self::PostCommented,
            "comment.replied" => Self::CommentReplied,
            "user.followed" => Self::UserFollowed,
            "community.joined" => Self::CommunityJoined,
            "violation.events" => Self::ViolationEvents,
            other => return Err(UnknownRoutingKey(other.to_string())),
        })
    }
}

/// A domain event as delivered by the message bus: a routing key, an
/// optional producer-assigned `message_id`, and a JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Which handler this event dispatches to.
    pub routing_key: RoutingKey,
    /// Producer-assigned id, when present, used directly as the dedup key.
    pub message_id: Option<String>,
    /// Per-kind JSON fields; see `spec.md` §4.1 for the shape expected per
    /// routing key.
    pub body: serde_json::Value,
}

/// Errors converting between [`EventEnvelope`] and the wire-level
/// [`SerializedEvent`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// `event_type` did not match any known routing key.
    #[error(transparent)]
    UnknownRoutingKey(#[from] UnknownRoutingKey),
    /// The payload bytes were not valid JSON.
    #[error("invalid JSON payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl EventEnvelope {
    /// Encode this envelope as a [`SerializedEvent`] for publishing.
    ///
    /// The routing key becomes the `event_type`, the body is serialized as
    /// JSON bytes (not bincode — producers across the platform emit plain
    /// JSON), and `message_id`, when present, rides in `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidPayload`] if the body cannot be
    /// serialized, which should not happen for a valid `serde_json::Value`.
    pub fn to_serialized(&self) -> Result<SerializedEvent, EnvelopeError> {
        let data = serde_json::to_vec(&self.body)?;
        let metadata = self
            .message_id
            .as_ref()
            .map(|id| serde_json::json!({ "message_id": id }));
        Ok(SerializedEvent::new(
            self.routing_key.as_str().to_string(),
            data,
            metadata,
        ))
    }

    /// Decode a [`SerializedEvent`] received from the bus back into an
    /// [`EventEnvelope`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownRoutingKey`] if `event_type` is not
    /// one of the closed set, [`EnvelopeError::InvalidPayload`] if the data
    /// is not valid JSON.
    pub fn from_serialized(event: &SerializedEvent) -> Result<Self, EnvelopeError> {
        let routing_key: RoutingKey = event.event_type.parse()?;
        let body = serde_json::from_slice(&event.data)?;
        let message_id = event
            .metadata
            .as_ref()
            .and_then(|m| m.get("message_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(Self {
            routing_key,
            message_id,
            body,
        })
    }

    /// Compute the dedup key for this envelope per spec.md §4.1: the
    /// producer's `message_id` if present, otherwise a 128-bit stable hash
    /// over the canonical byte sequence of the body.
    ///
    /// `serde_json::Value`'s `Object` variant is backed by a `BTreeMap`
    /// (this workspace does not enable serde_json's `preserve_order`
    /// feature), so `serde_json::to_vec` already emits object keys in
    /// sorted order — which is what makes the hash stable across producers
    /// that built the same JSON with different field-insertion order.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        if let Some(id) = &self.message_id {
            return id.clone();
        }
        let canonical = serde_json::to_vec(&self.body).unwrap_or_default();
        let digest = Sha256::digest(canonical);
        hex_encode(&digest[..16])
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_round_trips_through_str() {
        for key in [
            RoutingKey::PostCreated,
            RoutingKey::PostLiked,
            RoutingKey::PostCommented,
            RoutingKey::CommentReplied,
            RoutingKey::UserFollowed,
            RoutingKey::CommunityJoined,
            RoutingKey::ViolationEvents,
        ] {
            let parsed: RoutingKey = key.as_str().parse().expect("valid routing key");
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn unknown_routing_key_is_rejected() {
        let err = "post.deleted".parse::<RoutingKey>().unwrap_err();
        assert_eq!(err.0, "post.deleted");
    }

    #[test]
    fn dedup_key_prefers_message_id() {
        let env = EventEnvelope {
            routing_key: RoutingKey::PostLiked,
            message_id: Some("msg-1".to_string()),
            body: serde_json::json!({"post_owner": "u1"}),
        };
        assert_eq!(env.dedup_key(), "msg-1");
    }

    #[test]
    fn dedup_key_is_stable_across_field_order_without_message_id() {
        let a = EventEnvelope {
            routing_key: RoutingKey::PostLiked,
            message_id: None,
            body: serde_json::json!({"post_owner": "u1", "liker": "u2"}),
        };
        let b = EventEnvelope {
            routing_key: RoutingKey::PostLiked,
            message_id: None,
            body: serde_json::json!({"liker": "u2", "post_owner": "u1"}),
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key().len(), 32);
    }

    #[test]
    fn dedup_key_differs_for_different_bodies() {
        let a = EventEnvelope {
            routing_key: RoutingKey::PostLiked,
            message_id: None,
            body: serde_json::json!({"post_owner": "u1"}),
        };
        let b = EventEnvelope {
            routing_key: RoutingKey::PostLiked,
            message_id: None,
            body: serde_json::json!({"post_owner": "u2"}),
        };
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn serialized_round_trip_preserves_fields() {
        let env = EventEnvelope {
            routing_key: RoutingKey::CommentReplied,
            message_id: Some("m-42".to_string()),
            body: serde_json::json!({"parent_author": "u9", "excerpt": "nice!"}),
        };
        let wire = env.to_serialized().expect("serialize");
        let back = EventEnvelope::from_serialized(&wire).expect("deserialize");
        assert_eq!(back.routing_key, env.routing_key);
        assert_eq!(back.message_id, env.message_id);
        assert_eq!(back.body, env.body);
    }
}
