//! `PostgreSQL`-backed [`IdempotencyStore`].
//!
//! Atomicity comes from `INSERT ... ON CONFLICT DO NOTHING`: the conflicting
//! insert tells us in one round trip whether we were first. A background
//! reaper deletes expired rows so the table does not grow unbounded, the
//! same table-maintenance shape the teacher's DLQ store used for stale rows.

use composable_rust_core::idempotency_store::{CheckOutcome, IdempotencyStore, IdempotencyStoreError};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `PostgreSQL` implementation of [`IdempotencyStore`].
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete rows past their TTL. Intended to run on a periodic background
    /// task; callers choose the cadence.
    ///
    /// # Errors
    ///
    /// Returns the underlying `sqlx::Error` if the delete fails.
    pub async fn reap_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            DELETE FROM idempotency_keys
            WHERE expires_at <= NOW()
            ",
        )
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::debug!(deleted, "reaped expired idempotency keys");
            metrics::counter!("idempotency.reaped").increment(deleted);
        }

        Ok(deleted)
    }
}

impl IdempotencyStore for PostgresIdempotencyStore {
    fn check_and_mark(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<CheckOutcome, IdempotencyStoreError>> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        Box::pin(async move {
            if key.is_empty() {
                return Err(IdempotencyStoreError::InvalidKey);
            }

            #[allow(clippy::cast_possible_wrap)]
            let ttl_seconds = ttl.as_secs() as i64;

            let result = sqlx::query(
                r"
                INSERT INTO idempotency_keys (namespace, key, expires_at)
                VALUES ($1, $2, NOW() + make_interval(secs => $3))
                ON CONFLICT (namespace, key) DO NOTHING
                ",
            )
            .bind(&namespace)
            .bind(&key)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .await
            .map_err(|e| IdempotencyStoreError::Backend(e.to_string()))?;

            if result.rows_affected() == 1 {
                metrics::counter!("idempotency.first_seen").increment(1);
                Ok(CheckOutcome::First)
            } else {
                metrics::counter!("idempotency.duplicate").increment(1);
                tracing::debug!(namespace = %namespace, key = %key, "duplicate suppressed");
                Ok(CheckOutcome::Duplicate)
            }
        })
    }

    fn remove(
        &self,
        namespace: &str,
        key: &str,
    ) -> BoxFuture<'_, Result<(), IdempotencyStoreError>> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        Box::pin(async move {
            sqlx::query("DELETE FROM idempotency_keys WHERE namespace = $1 AND key = $2")
                .bind(&namespace)
                .bind(&key)
                .execute(&self.pool)
                .await
                .map_err(|e| IdempotencyStoreError::Backend(e.to_string()))?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_seconds_conversion_does_not_panic_on_typical_durations() {
        let ttl = Duration::from_secs(24 * 3600);
        #[allow(clippy::cast_possible_wrap)]
        let seconds = ttl.as_secs() as i64;
        assert_eq!(seconds, 86_400);
    }
}
