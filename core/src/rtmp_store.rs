//! RTMP publish session state machine capability (`spec.md` §4.9).
//!
//! Mirrors the shape of [`crate::idempotency_store`]: a narrow capability
//! trait whose atomicity guarantee (the CAS-like guarded transition) is the
//! whole contract, backed by a Postgres implementation and an in-memory one
//! for tests.

use crate::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Lifecycle status of a streaming session.
///
/// The only legal sequence is a prefix of `Idle -> Live -> Ended`; no
/// transition ever moves backward (`spec.md` §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtmpStatus {
    /// No publisher currently attached.
    Idle,
    /// A publisher is actively streaming.
    Live,
    /// The session has ended; terminal.
    Ended,
}

impl RtmpStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }
}

/// A streaming session entity (`spec.md` §4.9).
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpSession {
    /// Stream identifier, as referenced by the media server's `stream` field.
    pub id: String,
    /// The secret the media server must present in `on_publish`'s `token` param.
    pub stream_key: String,
    /// Current lifecycle status.
    pub status: RtmpStatus,
    /// When the session transitioned to `Live`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the session transitioned to `Ended`.
    pub ended_at: Option<DateTime<Utc>>,
    /// Current viewer count; reset to zero on `Ended`.
    pub viewer_count: i64,
}

/// Errors from RTMP session store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtmpStoreError {
    /// No session exists with the given id.
    #[error("rtmp session {0} not found")]
    NotFound(String),
    /// The underlying storage backend failed.
    #[error("rtmp session store backend error: {0}")]
    Backend(String),
}

/// Outcome of [`RtmpSessionStore::on_publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The session was `Idle` and the token matched; now `Live`.
    Accepted,
    /// The token did not match the stored `stream_key`.
    TokenMismatch,
    /// The session was not `Idle` (already live, already ended).
    InvalidState {
        /// The status the session was actually in.
        current: RtmpStatus,
    },
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability trait for the RTMP publish state machine.
pub trait RtmpSessionStore: Send + Sync {
    /// Look up a session by id.
    ///
    /// # Errors
    ///
    /// Returns [`RtmpStoreError::Backend`] if the query fails.
    fn find(&self, stream_id: &str) -> BoxFuture<'_, Result<Option<RtmpSession>, RtmpStoreError>>;

    /// `on_publish(stream_id, token)`: require a stored session with a
    /// matching `stream_key` currently `Idle`; transition it to `Live` and
    /// set `started_at`. Any other state is reported, not an error — the
    /// caller translates the outcome into the webhook's accept/reject code.
    ///
    /// # Errors
    ///
    /// Returns [`RtmpStoreError::NotFound`] if no session exists with this
    /// id, [`RtmpStoreError::Backend`] if the transition fails.
    fn on_publish(
        &self,
        stream_id: &str,
        token: &str,
    ) -> BoxFuture<'_, Result<PublishOutcome, RtmpStoreError>>;

    /// `on_unpublish(stream_id)`: if `Live`, transition to `Ended`, set
    /// `ended_at`, and reset `viewer_count` to zero. Idempotent — already
    /// `Ended` or `Idle` is a no-op, not an error (`spec.md` §4.9: "always
    /// return an accept code").
    ///
    /// # Errors
    ///
    /// Returns [`RtmpStoreError::NotFound`] if no session exists with this
    /// id, [`RtmpStoreError::Backend`] if the transition fails.
    fn on_unpublish(&self, stream_id: &str) -> BoxFuture<'_, Result<(), RtmpStoreError>>;
}

impl fmt::Debug for dyn RtmpSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn RtmpSessionStore")
    }
}
