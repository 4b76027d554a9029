//! `PostgreSQL`-backed [`OutboxStore`].
//!
//! `fetch_pending` uses `FOR UPDATE SKIP LOCKED` so that if more than one
//! outbox worker is ever run for availability, they partition the pending
//! set instead of racing to publish the same row twice.

use composable_rust_core::outbox_store::{OutboxEntry, OutboxStatus, OutboxStore, OutboxStoreError};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `PostgreSQL` implementation of [`OutboxStore`].
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> OutboxEntry {
        let status: String = row.get("status");
        OutboxEntry {
            id: row.get("id"),
            aggregate_id: row.get("aggregate_id"),
            routing_key: row.get("routing_key"),
            payload: row.get("payload"),
            status: if status == OutboxStatus::Published.as_str() {
                OutboxStatus::Published
            } else {
                OutboxStatus::Pending
            },
            created_at: row.get("created_at"),
        }
    }
}

impl OutboxStore for PostgresOutboxStore {
    fn append(
        &self,
        aggregate_id: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, Result<i64, OutboxStoreError>> {
        let aggregate_id = aggregate_id.to_string();
        let routing_key = routing_key.to_string();
        Box::pin(async move {
            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO outbox (aggregate_id, routing_key, payload, status)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                ",
            )
            .bind(&aggregate_id)
            .bind(&routing_key)
            .bind(&payload)
            .bind(OutboxStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OutboxStoreError::Backend(e.to_string()))?;

            metrics::counter!("outbox.appended").increment(1);
            tracing::debug!(outbox_id = id, routing_key = %routing_key, "outbox entry appended");

            Ok(id)
        })
    }

    fn fetch_pending(
        &self,
        batch_size: i64,
    ) -> BoxFuture<'_, Result<Vec<OutboxEntry>, OutboxStoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, aggregate_id, routing_key, payload, status, created_at
                FROM outbox
                WHERE status = $1
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
                ",
            )
            .bind(OutboxStatus::Pending.as_str())
            .bind(batch_size)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OutboxStoreError::Backend(e.to_string()))?;

            Ok(rows.iter().map(Self::row_to_entry).collect())
        })
    }

    fn mark_published(&self, id: i64) -> BoxFuture<'_, Result<(), OutboxStoreError>> {
        Box::pin(async move {
            sqlx::query("UPDATE outbox SET status = $1 WHERE id = $2")
                .bind(OutboxStatus::Published.as_str())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| OutboxStoreError::Backend(e.to_string()))?;

            metrics::counter!("outbox.published").increment(1);

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_string_form() {
        assert_eq!(OutboxStatus::Pending.as_str(), "pending");
        assert_eq!(OutboxStatus::Published.as_str(), "published");
    }
}
