//! `PostgreSQL`-backed stores for the Pulsefeed event fabric.
//!
//! This crate originally scaffolded a generic event-sourcing store and a
//! Dead Letter Queue, neither wired into the workspace: there are no
//! event-sourced aggregates here, and `social.events` dead-lettering is
//! specified as a named property rather than an implementation.
//! What ships is the set of stores the fabric actually dispatches to:
//! notifications, idempotency keys (with a TTL reaper), and the outbox.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod idempotency;
pub mod notifications;
pub mod outbox;
pub mod rtmp;

pub use idempotency::PostgresIdempotencyStore;
pub use notifications::PostgresNotificationStore;
pub use outbox::PostgresOutboxStore;
pub use rtmp::PostgresRtmpSessionStore;
