//! `PostgreSQL`-backed [`NotificationStore`].
//!
//! Plain `sqlx::query`/`query_as`, a `row_to_notification` mapping helper,
//! and a `tracing`/`metrics` call alongside every write.

use chrono::Utc;
use composable_rust_core::notification_store::{
    AggregationOutcome, Notification, NotificationStore, NotificationStoreError, Pagination,
};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `PostgreSQL` implementation of [`NotificationStore`].
pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_notification(row: &sqlx::postgres::PgRow) -> Notification {
        Notification {
            id: row.get("id"),
            user_id: row.get("user_id"),
            title_template: row.get("title_template"),
            body_template: row.get("body_template"),
            notification_type: row.get("notification_type"),
            reference_id: row.get("reference_id"),
            actors_count: row.get("actors_count"),
            last_actor_id: row.get("last_actor_id"),
            last_actor_name: row.get("last_actor_name"),
            is_read: row.get("is_read"),
            link_url: row.get("link_url"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

impl NotificationStore for PostgresNotificationStore {
    fn create(
        &self,
        user_id: &str,
        title_template: &str,
        body_template: &str,
        link_url: Option<&str>,
    ) -> BoxFuture<'_, Result<i64, NotificationStoreError>> {
        let user_id = user_id.to_string();
        let title_template = title_template.to_string();
        let body_template = body_template.to_string();
        let link_url = link_url.map(str::to_string);
        Box::pin(async move {
            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO notifications (user_id, title_template, body_template, actors_count, is_read, link_url)
                VALUES ($1, $2, $3, 1, false, $4)
                RETURNING id
                ",
            )
            .bind(&user_id)
            .bind(&title_template)
            .bind(&body_template)
            .bind(&link_url)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;

            metrics::counter!("notifications.created").increment(1);
            tracing::debug!(notification_id = id, user_id = %user_id, "notification created");

            Ok(id)
        })
    }

    fn create_many(
        &self,
        user_ids: &[String],
        title_template: &str,
        body_template: &str,
        link_url: Option<&str>,
    ) -> BoxFuture<'_, Result<Vec<i64>, NotificationStoreError>> {
        let user_ids = user_ids.to_vec();
        let title_template = title_template.to_string();
        let body_template = body_template.to_string();
        let link_url = link_url.map(str::to_string);
        Box::pin(async move {
            let mut ids = Vec::with_capacity(user_ids.len());
            for user_id in &user_ids {
                let (id,): (i64,) = sqlx::query_as(
                    r"
                    INSERT INTO notifications (user_id, title_template, body_template, actors_count, is_read, link_url)
                    VALUES ($1, $2, $3, 1, false, $4)
                    RETURNING id
                    ",
                )
                .bind(user_id)
                .bind(&title_template)
                .bind(&body_template)
                .bind(&link_url)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;
                ids.push(id);
            }

            metrics::counter!("notifications.created").increment(ids.len() as u64);
            tracing::debug!(count = ids.len(), "notifications fanned out");

            Ok(ids)
        })
    }

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
    ) -> BoxFuture<'_, Result<(i64, AggregationOutcome), NotificationStoreError>> {
        let user_id = user_id.to_string();
        let notification_type = notification_type.to_string();
        let reference_id = reference_id.to_string();
        let title_template = title_template.to_string();
        let body_template = body_template.to_string();
        let link_url = link_url.map(str::to_string);
        let last_actor_id = last_actor_id.to_string();
        let last_actor_name = last_actor_name.to_string();

        Box::pin(async move {
            let existing = sqlx::query(
                r"
                SELECT id, actors_count
                FROM notifications
                WHERE user_id = $1 AND notification_type = $2 AND reference_id = $3
                  AND created_at >= $4
                ORDER BY created_at DESC
                LIMIT 1
                ",
            )
            .bind(&user_id)
            .bind(&notification_type)
            .bind(&reference_id)
            .bind(Utc::now() - window)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;

            if let Some(row) = existing {
                let id: i64 = row.get("id");
                let prior_actors_count: i32 = row.get("actors_count");

                sqlx::query(
                    r"
                    UPDATE notifications
                    SET actors_count = actors_count + 1,
                        last_actor_id = $1,
                        last_actor_name = $2,
                        body_template = $3,
                        updated_at = NOW()
                    WHERE id = $4
                    ",
                )
                .bind(&last_actor_id)
                .bind(&last_actor_name)
                .bind(&body_template)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;

                metrics::counter!("notifications.aggregated").increment(1);
                tracing::debug!(notification_id = id, prior_actors_count, "notification aggregated");

                Ok((id, AggregationOutcome::Incremented { prior_actors_count }))
            } else {
                let (id,): (i64,) = sqlx::query_as(
                    r"
                    INSERT INTO notifications (
                        user_id, title_template, body_template, notification_type,
                        reference_id, actors_count, last_actor_id, last_actor_name,
                        is_read, link_url
                    ) VALUES ($1, $2, $3, $4, $5, 1, $6, $7, false, $8)
                    RETURNING id
                    ",
                )
                .bind(&user_id)
                .bind(&title_template)
                .bind(&body_template)
                .bind(&notification_type)
                .bind(&reference_id)
                .bind(&last_actor_id)
                .bind(&last_actor_name)
                .bind(&link_url)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;

                metrics::counter!("notifications.created").increment(1);
                tracing::debug!(notification_id = id, "aggregated notification row created");

                Ok((id, AggregationOutcome::Created))
            }
        })
    }

    fn find_by_user(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<Vec<Notification>, NotificationStoreError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, user_id, title_template, body_template, notification_type,
                       reference_id, actors_count, last_actor_id, last_actor_name,
                       is_read, link_url, created_at, updated_at
                FROM notifications
                WHERE user_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                ",
            )
            .bind(&user_id)
            .bind(pagination.limit)
            .bind(pagination.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;

            Ok(rows.iter().map(Self::row_to_notification).collect())
        })
    }

    fn find_aggregated(
        &self,
        user_id: &str,
        notification_type: &str,
        reference_id: &str,
        window: chrono::Duration,
    ) -> BoxFuture<'_, Result<Option<Notification>, NotificationStoreError>> {
        let user_id = user_id.to_string();
        let notification_type = notification_type.to_string();
        let reference_id = reference_id.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, user_id, title_template, body_template, notification_type,
                       reference_id, actors_count, last_actor_id, last_actor_name,
                       is_read, link_url, created_at, updated_at
                FROM notifications
                WHERE user_id = $1 AND notification_type = $2 AND reference_id = $3
                  AND created_at >= $4
                ORDER BY created_at DESC
                LIMIT 1
                ",
            )
            .bind(&user_id)
            .bind(&notification_type)
            .bind(&reference_id)
            .bind(Utc::now() - window)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;

            Ok(row.as_ref().map(Self::row_to_notification))
        })
    }

    fn mark_read(&self, id: i64) -> BoxFuture<'_, Result<(), NotificationStoreError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE notifications
                SET is_read = true, updated_at = NOW()
                WHERE id = $1
                ",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;

            if result.rows_affected() == 0 {
                return Err(NotificationStoreError::NotFound(id));
            }

            Ok(())
        })
    }

    fn delete(&self, id: i64) -> BoxFuture<'_, Result<(), NotificationStoreError>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM notifications WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| NotificationStoreError::Backend(e.to_string()))?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_outcome_reports_prior_count() {
        let outcome = AggregationOutcome::Incremented {
            prior_actors_count: 2,
        };
        assert!(matches!(
            outcome,
            AggregationOutcome::Incremented {
                prior_actors_count: 2
            }
        ));
    }
}
