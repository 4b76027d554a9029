//! Idempotency key capability.
//!
//! Backs both §4.1's dedup of delivered events (namespace `processed_msg:`)
//! and §4.5's general-purpose request dedup (namespace `idempotency:`).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors from idempotency store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyStoreError {
    /// `key` was empty.
    #[error("idempotency key must not be empty")]
    InvalidKey,

    /// The underlying storage backend is unreachable or failed.
    #[error("idempotency store backend error: {0}")]
    Backend(String),
}

/// Outcome of [`IdempotencyStore::check_and_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// This is the first time `(namespace, key)` has been seen within `ttl`.
    First,
    /// `(namespace, key)` was already marked within `ttl`.
    Duplicate,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability trait for atomic set-if-absent idempotency tracking.
///
/// `check_and_mark` must be atomic across every process sharing the same
/// backing store — a Postgres implementation achieves this with
/// `INSERT ... ON CONFLICT DO NOTHING`.
pub trait IdempotencyStore: Send + Sync {
    /// Atomically mark `(namespace, key)` as seen, returning whether this is
    /// the first time within `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyStoreError::InvalidKey`] if `key` is empty,
    /// [`IdempotencyStoreError::Backend`] if the store is unreachable.
    fn check_and_mark(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<CheckOutcome, IdempotencyStoreError>>;

    /// Evict a key early, e.g. to permit retry after a handler failure.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyStoreError::Backend`] if the store is unreachable.
    fn remove(
        &self,
        namespace: &str,
        key: &str,
    ) -> BoxFuture<'_, Result<(), IdempotencyStoreError>>;
}

impl fmt::Debug for dyn IdempotencyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn IdempotencyStore")
    }
}

/// Default TTL for the `idempotency:` namespace (24h).
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Default TTL for the `processed_msg:` namespace (1h).
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(3600);
