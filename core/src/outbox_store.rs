//! Transactional outbox capability.

use crate::DateTime;
use crate::Utc;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from outbox store operations.
#[derive(Error, Debug, Clone)]
pub enum OutboxStoreError {
    /// The underlying storage backend failed.
    #[error("outbox store backend error: {0}")]
    Backend(String),
}

/// Status of an [`OutboxEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Written, not yet handed to the bus.
    Pending,
    /// Acknowledged by the broker.
    Published,
}

impl OutboxStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
        }
    }
}

/// A row written in the same transaction as the aggregate mutation it
/// describes, later dispatched to the bus by the polling worker.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    /// Primary key.
    pub id: i64,
    /// The aggregate this entry was written alongside.
    pub aggregate_id: String,
    /// The routing key to publish under.
    pub routing_key: String,
    /// The JSON payload to publish.
    pub payload: serde_json::Value,
    /// Current lifecycle status.
    pub status: OutboxStatus,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability trait for the outbox table.
pub trait OutboxStore: Send + Sync {
    /// Append a pending entry. Callers are expected to run this inside the
    /// same database transaction as the aggregate mutation it accompanies;
    /// this trait does not itself manage transactions.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError::Backend`] if the insert fails.
    fn append(
        &self,
        aggregate_id: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, Result<i64, OutboxStoreError>>;

    /// Fetch up to `batch_size` pending rows, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError::Backend`] if the query fails.
    fn fetch_pending(
        &self,
        batch_size: i64,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, OutboxStoreError>>;

    /// Mark a row published after broker acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError::Backend`] if the update fails.
    fn mark_published(&self, id: i64) -> BoxFuture<'_, Result<(), OutboxStoreError>>;
}

impl fmt::Debug for dyn OutboxStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn OutboxStore")
    }
}
