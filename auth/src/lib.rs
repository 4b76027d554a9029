//! # Composable Rust Rate Limiting
//!
//! This crate originally hosted a full passwordless authentication and
//! authorization system (WebAuthn, magic links, OAuth2/OIDC, sessions). That
//! surface has no counterpart in this workspace — identity arrives
//! pre-validated from an upstream gateway and no service here performs
//! authorization — so the crate has been pared down to the one primitive
//! still in use: sliding-window rate limiting, shared by the chat room hub.
//!
//! ## Architecture
//!
//! `RateLimiter` is a capability trait; `InMemoryRateLimiter` is the only
//! implementation carried forward, since every caller owns a single process
//! and needs no cross-instance coordination for this limiter.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod error;
pub mod rate_limiter;

pub use error::{AuthError, Result};
pub use rate_limiter::{InMemoryRateLimiter, RateLimiter};
