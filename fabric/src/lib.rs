//! The real-time event fabric: event consumption, the WebSocket gateway,
//! cross-instance delivery, and the livestream moderation monitor.
//!
//! This crate is the sole consumer of [`composable_rust_core`]'s
//! notification/idempotency/outbox/event-bus capability traits; it wires
//! them to [`composable_rust_postgres`] and [`composable_rust_redpanda`] in
//! production and to [`composable_rust_testing`]'s in-memory fakes in tests.

pub mod chat;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod gateway;
pub mod monitor;
pub mod outbox;
pub mod router;
pub mod rtmp;
pub mod server;

pub use config::Config;
