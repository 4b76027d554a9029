//! `PostgreSQL`-backed [`RtmpSessionStore`].
//!
//! `on_publish` uses a guarded `UPDATE ... WHERE status = 'idle' RETURNING`
//! so two concurrent webhook deliveries for the same stream can't both
//! observe `Idle` and both transition to `Live`; only one `UPDATE` matches a
//! row and the other falls through to the `find` branch below, same
//! discipline as [`crate::outbox::PostgresOutboxStore::fetch_pending`]'s
//! `FOR UPDATE SKIP LOCKED`.

use composable_rust_core::rtmp_store::{
    PublishOutcome, RtmpSession, RtmpSessionStore, RtmpStatus, RtmpStoreError,
};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `PostgreSQL` implementation of [`RtmpSessionStore`].
pub struct PostgresRtmpSessionStore {
    pool: PgPool,
}

impl PostgresRtmpSessionStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> RtmpSession {
        let status: String = row.get("status");
        RtmpSession {
            id: row.get("id"),
            stream_key: row.get("stream_key"),
            status: match status.as_str() {
                "live" => RtmpStatus::Live,
                "ended" => RtmpStatus::Ended,
                _ => RtmpStatus::Idle,
            },
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
            viewer_count: row.get("viewer_count"),
        }
    }
}

impl RtmpSessionStore for PostgresRtmpSessionStore {
    fn find(&self, stream_id: &str) -> BoxFuture<'_, Result<Option<RtmpSession>, RtmpStoreError>> {
        let stream_id = stream_id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, stream_key, status, started_at, ended_at, viewer_count
                FROM rtmp_sessions
                WHERE id = $1
                ",
            )
            .bind(&stream_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RtmpStoreError::Backend(e.to_string()))?;

            Ok(row.as_ref().map(Self::row_to_session))
        })
    }

    fn on_publish(
        &self,
        stream_id: &str,
        token: &str,
    ) -> BoxFuture<'_, Result<PublishOutcome, RtmpStoreError>> {
        let stream_id = stream_id.to_string();
        let token = token.to_string();
        Box::pin(async move {
            let updated = sqlx::query(
                r"
                UPDATE rtmp_sessions
                SET status = 'live', started_at = now()
                WHERE id = $1 AND stream_key = $2 AND status = 'idle'
                RETURNING id, stream_key, status, started_at, ended_at, viewer_count
                ",
            )
            .bind(&stream_id)
            .bind(&token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RtmpStoreError::Backend(e.to_string()))?;

            if updated.is_some() {
                metrics::counter!("rtmp.publish.accepted").increment(1);
                tracing::info!(stream_id, "rtmp publish accepted");
                return Ok(PublishOutcome::Accepted);
            }

            let Some(session) = self.find(&stream_id).await? else {
                return Err(RtmpStoreError::NotFound(stream_id));
            };

            if session.status != RtmpStatus::Idle {
                metrics::counter!("rtmp.publish.invalid_state").increment(1);
                return Ok(PublishOutcome::InvalidState { current: session.status });
            }

            metrics::counter!("rtmp.publish.token_mismatch").increment(1);
            tracing::warn!(stream_id, "rtmp publish rejected: token mismatch");
            Ok(PublishOutcome::TokenMismatch)
        })
    }

    fn on_unpublish(&self, stream_id: &str) -> BoxFuture<'_, Result<(), RtmpStoreError>> {
        let stream_id = stream_id.to_string();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE rtmp_sessions
                SET status = 'ended', ended_at = now(), viewer_count = 0
                WHERE id = $1 AND status = 'live'
                ",
            )
            .bind(&stream_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RtmpStoreError::Backend(e.to_string()))?;

            if result.rows_affected() == 0 && self.find(&stream_id).await?.is_none() {
                return Err(RtmpStoreError::NotFound(stream_id));
            }

            metrics::counter!("rtmp.unpublish").increment(1);
            tracing::info!(stream_id, "rtmp unpublish processed");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_string_form() {
        assert_eq!(RtmpStatus::Idle.as_str(), "idle");
        assert_eq!(RtmpStatus::Live.as_str(), "live");
        assert_eq!(RtmpStatus::Ended.as_str(), "ended");
    }
}
