//! Notification persistence capability.
//!
//! Mirrors the `EventStore`/`EventBus` capability-trait shape used elsewhere
//! in this crate: a narrow trait, a production implementation backed by
//! `sqlx`/Postgres, and an in-memory implementation for tests.

use crate::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from notification store operations.
#[derive(Error, Debug, Clone)]
pub enum NotificationStoreError {
    /// The underlying storage backend failed.
    #[error("notification store backend error: {0}")]
    Backend(String),

    /// No notification exists with the given id.
    #[error("notification {0} not found")]
    NotFound(i64),
}

/// A persisted notification.
///
/// Invariant: for a given `(user_id, notification_type,
/// reference_id)` triple where all three are present, at most one *active*
/// aggregated row exists; additional aggregatable events bump
/// `actors_count` and rewrite `last_actor_*` rather than inserting a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Globally unique identifier.
    pub id: i64,
    /// The recipient.
    pub user_id: String,
    /// Template string for the notification title (kept distinct from
    /// `body_template` since clients may render them in different slots).
    pub title_template: String,
    /// Template string for the notification body, already rendered with
    /// the actor/count substitutions described below.
    pub body_template: String,
    /// Routing-key-derived category used to key aggregation, e.g. `"post_liked"`.
    pub notification_type: Option<String>,
    /// The entity the notification refers to (e.g. a post id), used together
    /// with `notification_type` and `user_id` to find the aggregation target.
    pub reference_id: Option<String>,
    /// Number of distinct actors folded into this row.
    pub actors_count: i32,
    /// The most recent actor's id.
    pub last_actor_id: Option<String>,
    /// The most recent actor's display name.
    pub last_actor_name: Option<String>,
    /// Whether the recipient has acknowledged this notification.
    pub is_read: bool,
    /// Deep link for the client to navigate to on tap.
    pub link_url: Option<String>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time (bumped on every aggregation increment and on read).
    pub updated_at: DateTime<Utc>,
}

/// Pagination cursor for `find_by_user`.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Maximum rows to return.
    pub limit: i64,
    /// Rows to skip, in `created_at DESC` order.
    pub offset: i64,
}

impl Pagination {
    /// A page of the first `limit` most recent notifications.
    #[must_use]
    pub const fn first(limit: i64) -> Self {
        Self { limit, offset: 0 }
    }
}

/// A freshly-created or incremented notification row, as returned by
/// `create_aggregated`, carrying enough of the prior state for the caller
/// to render the plural body template ("the first dup shows 'A
/// and 1 others'" — the template needs the count *before* this increment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// No prior row existed; a fresh one was inserted with `actors_count = 1`.
    Created,
    /// A prior row existed with this `actors_count` before the increment.
    Incremented {
        /// `actors_count` before this event was folded in.
        prior_actors_count: i32,
    },
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability trait for notification persistence.
///
/// Dyn-compatible (`Pin<Box<dyn Future>>` returns) for the same reason as
/// [`crate::event_bus::EventBus`]: callers hold this behind `Arc<dyn
/// NotificationStore>`.
pub trait NotificationStore: Send + Sync {
    /// Insert a single non-aggregated notification for one user.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError::Backend`] if the write fails.
    fn create(
        &self,
        user_id: &str,
        title_template: &str,
        body_template: &str,
        link_url: Option<&str>,
    ) -> BoxFuture<'_, Result<i64, NotificationStoreError>>;

    /// Insert the same notification for many users (fan-out).
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError::Backend`] if any write fails. Per
    /// The realtime publish that follows a successful insert is
    /// best-effort and must not roll this back; that publish happens above
    /// this trait, not inside it.
    fn create_many(
        &self,
        user_ids: &[String],
        title_template: &str,
        body_template: &str,
        link_url: Option<&str>,
    ) -> BoxFuture<'_, Result<Vec<i64>, NotificationStoreError>>;

    /// Upsert-then-increment an aggregated notification.
    ///
    /// Looks up `find_aggregated(user_id, notification_type, reference_id)`
    /// restricted to rows created within `window`. If found, increments
    /// `actors_count`, overwrites `last_actor_id`/`last_actor_name`, rewrites
    /// `body_template`, and bumps `updated_at`. Otherwise inserts a new row
    /// with `actors_count = 1`.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError::Backend`] if the read or write fails.
    #[allow(clippy::too_many_arguments)]
    fn create_aggregated(
        &self,
        user_id: &str,
        notification_type: &str,
        reference_id: &str,
        title_template: &str,
        body_template: &str,
        link_url: Option<&str>,
        last_actor_id: &str,
        last_actor_name: &str,
        window: chrono::Duration,
    ) -> BoxFuture<'_, Result<(i64, AggregationOutcome), NotificationStoreError>>;

    /// Find a user's notifications, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError::Backend`] if the query fails.
    fn find_by_user(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<Notification>, NotificationStoreError>>;

    /// Find the active aggregation target, if any, for `(user, type, ref)`
    /// created within `window` of now.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError::Backend`] if the query fails.
    fn find_aggregated(
        &self,
        user_id: &str,
        notification_type: &str,
        reference_id: &str,
        window: chrono::Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, NotificationStoreError>>;

    /// Mark a notification read. Monotone: calling this twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError::NotFound`] if `id` does not exist,
    /// [`NotificationStoreError::Backend`] if the update fails.
    fn mark_read(&self, id: i64) -> BoxFuture<'_, Result<(), NotificationStoreError>>;

    /// Delete a notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationStoreError::Backend`] if the delete fails.
    fn delete(&self, id: i64) -> BoxFuture<'_, Result<(), NotificationStoreError>>;
}

impl fmt::Debug for dyn NotificationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn NotificationStore")
    }
}
