//! Per-routing-key handler table (`spec.md` §4.1).

use super::follower_lookup::{FollowerLookup, FollowerLookupError};
use crate::domain::event::{EventEnvelope, RoutingKey};
use crate::gateway::{NotificationPayload, NotificationPushFrame};
use crate::router::RealtimeNotifier;
use composable_rust_core::notification_store::{AggregationOutcome, NotificationStore, NotificationStoreError};
use serde_json::Value;
use thiserror::Error;

/// Errors from dispatching one envelope to its handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The payload was missing a field the handler requires; per §7 this is
    /// ack-and-drop, not a retry.
    #[error("invalid event payload: {0}")]
    Validation(String),
    /// A store or collaborator call failed; per §7 this is nack-without-requeue.
    #[error("handler failed: {0}")]
    Transient(String),
}

impl From<NotificationStoreError> for DispatchError {
    fn from(error: NotificationStoreError) -> Self {
        Self::Transient(error.to_string())
    }
}

impl From<FollowerLookupError> for DispatchError {
    fn from(error: FollowerLookupError) -> Self {
        Self::Transient(error.to_string())
    }
}

/// Default aggregation window (T=24h per §4.1).
pub const DEFAULT_AGGREGATE_WINDOW: chrono::Duration = chrono::Duration::hours(24);

/// Recipients and rendered content for the realtime push that follows a
/// successful notification write (§4.2: "best-effort, must not roll back the
/// write"). Built by a handler, published by [`dispatch_with_window`] once
/// the write it describes has already committed.
struct PublishPlan {
    recipients: Vec<String>,
    event_type: &'static str,
    title: String,
    body: String,
    link: Option<String>,
}

/// Route `envelope` to its handler and persist the resulting notification(s).
///
/// # Errors
///
/// See [`DispatchError`].
pub async fn dispatch(
    notifications: &dyn NotificationStore,
    followers: &dyn FollowerLookup,
    notify: &dyn RealtimeNotifier,
    envelope: &EventEnvelope,
) -> Result<(), DispatchError> {
    dispatch_with_window(notifications, followers, notify, envelope, DEFAULT_AGGREGATE_WINDOW).await
}

/// Same as [`dispatch`] but with an explicit aggregation window, so callers
/// can honor a configured `aggregate_window_h`.
///
/// # Errors
///
/// See [`DispatchError`].
pub async fn dispatch_with_window(
    notifications: &dyn NotificationStore,
    followers: &dyn FollowerLookup,
    notify: &dyn RealtimeNotifier,
    envelope: &EventEnvelope,
    window: chrono::Duration,
) -> Result<(), DispatchError> {
    let plan = match envelope.routing_key {
        RoutingKey::ViolationEvents => handle_violation(notifications, &envelope.body).await?,
        RoutingKey::PostCreated => handle_post_created(notifications, followers, &envelope.body).await?,
        RoutingKey::UserFollowed => handle_user_followed(notifications, &envelope.body).await?,
        RoutingKey::PostLiked => {
            handle_aggregatable(
                notifications,
                &envelope.body,
                "post_owner",
                "post_liked",
                "post_id",
                "liker",
                "New Like",
                "liked your post",
                window,
            )
            .await?
        }
        RoutingKey::PostCommented => {
            handle_aggregatable(
                notifications,
                &envelope.body,
                "post_owner",
                "post_commented",
                "post_id",
                "commenter",
                "New Comment",
                "commented on your post",
                window,
            )
            .await?
        }
        RoutingKey::CommentReplied => handle_comment_replied(notifications, &envelope.body).await?,
        RoutingKey::CommunityJoined => handle_community_joined(notifications, &envelope.body).await?,
    };

    if let Some(plan) = plan {
        publish_plan(notify, plan).await;
    }
    Ok(())
}

/// Push `plan` to every recipient. Failure is logged, never propagated —
/// the notification row this plan describes is already committed (§4.2).
async fn publish_plan(notify: &dyn RealtimeNotifier, plan: PublishPlan) {
    let frame = NotificationPushFrame {
        event_type: plan.event_type.to_string(),
        user_ids: plan.recipients.clone(),
        payload: NotificationPayload {
            title: plan.title,
            body: plan.body,
            link: plan.link,
            created_at: chrono::Utc::now(),
        },
    };
    for user_id in &plan.recipients {
        if let Err(error) = notify.notify_user(user_id, &frame).await {
            tracing::warn!(%error, user_id, "realtime notification push failed");
        }
    }
}

fn required_str<'a>(body: &'a Value, field: &str) -> Result<&'a str, DispatchError> {
    body.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Validation(format!("missing field `{field}`")))
}

async fn handle_violation(
    notifications: &dyn NotificationStore,
    body: &Value,
) -> Result<Option<PublishPlan>, DispatchError> {
    let user_id = required_str(body, "user_id")?;
    let reason = body
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("Your content was flagged for review.");
    notifications
        .create(user_id, "Content Warning", reason, None)
        .await?;
    Ok(Some(PublishPlan {
        recipients: vec![user_id.to_string()],
        event_type: "violation.events",
        title: "Content Warning".to_string(),
        body: reason.to_string(),
        link: None,
    }))
}

async fn handle_post_created(
    notifications: &dyn NotificationStore,
    followers: &dyn FollowerLookup,
    body: &Value,
) -> Result<Option<PublishPlan>, DispatchError> {
    let author = required_str(body, "user_id")?;
    let recipients = followers.followers(author).await?;
    if recipients.is_empty() {
        return Ok(None);
    }
    notifications
        .create_many(
            &recipients,
            "New Post",
            "New post from someone you follow",
            None,
        )
        .await?;
    Ok(Some(PublishPlan {
        recipients,
        event_type: "post.created",
        title: "New Post".to_string(),
        body: "New post from someone you follow".to_string(),
        link: None,
    }))
}

async fn handle_user_followed(
    notifications: &dyn NotificationStore,
    body: &Value,
) -> Result<Option<PublishPlan>, DispatchError> {
    let user_id = required_str(body, "user_id")?;
    let follower = required_str(body, "follower")?;
    let body_text = format!("{follower} followed you");
    notifications
        .create(user_id, "New Follower", &body_text, None)
        .await?;
    Ok(Some(PublishPlan {
        recipients: vec![user_id.to_string()],
        event_type: "user.followed",
        title: "New Follower".to_string(),
        body: body_text,
        link: None,
    }))
}

async fn handle_comment_replied(
    notifications: &dyn NotificationStore,
    body: &Value,
) -> Result<Option<PublishPlan>, DispatchError> {
    let parent_author = required_str(body, "parent_author")?;
    let replier = required_str(body, "replier")?;
    let excerpt = required_str(body, "excerpt")?;
    let body_text = format!("{replier} replied: {excerpt}");
    notifications
        .create(parent_author, "New Reply", &body_text, None)
        .await?;
    Ok(Some(PublishPlan {
        recipients: vec![parent_author.to_string()],
        event_type: "comment.replied",
        title: "New Reply".to_string(),
        body: body_text,
        link: None,
    }))
}

async fn handle_community_joined(
    notifications: &dyn NotificationStore,
    body: &Value,
) -> Result<Option<PublishPlan>, DispatchError> {
    let user_id = required_str(body, "user_id")?;
    let community = required_str(body, "community")?;
    let body_text = format!("You joined {community}");
    notifications
        .create(user_id, "Community Joined", &body_text, None)
        .await?;
    Ok(Some(PublishPlan {
        recipients: vec![user_id.to_string()],
        event_type: "community.joined",
        title: "Community Joined".to_string(),
        body: body_text,
        link: None,
    }))
}

#[allow(clippy::too_many_arguments)]
async fn handle_aggregatable(
    notifications: &dyn NotificationStore,
    body: &Value,
    owner_field: &str,
    notification_type: &'static str,
    reference_field: &str,
    actor_field: &str,
    title: &str,
    verb: &str,
    window: chrono::Duration,
) -> Result<Option<PublishPlan>, DispatchError> {
    let owner = required_str(body, owner_field)?;
    let reference_id = required_str(body, reference_field)?;
    let actor_id = required_str(body, actor_field)?;
    let actor_name = body
        .get(format!("{actor_field}_name").as_str())
        .and_then(Value::as_str)
        .unwrap_or(actor_id);

    // §4.1 wants the body rendered with the *prior* count, but
    // `create_aggregated` only reports the outcome after already writing
    // whatever body we hand it. So render up front from a read of the
    // current state; the store's own upsert remains the atomic operation,
    // this is only for picking the right template.
    let existing = notifications
        .find_aggregated(owner, notification_type, reference_id, window)
        .await?;
    let body_template = match existing {
        Some(prior) => format!(
            "{actor_name} and {} others {verb}",
            prior.actors_count
        ),
        None => format!("{actor_name} {verb}"),
    };

    let _: (i64, AggregationOutcome) = notifications
        .create_aggregated(
            owner,
            notification_type,
            reference_id,
            title,
            &body_template,
            None,
            actor_id,
            actor_name,
            window,
        )
        .await?;

    Ok(Some(PublishPlan {
        recipients: vec![owner.to_string()],
        event_type: notification_type,
        title: title.to_string(),
        body: body_template,
        link: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_str_rejects_missing_field() {
        let body = serde_json::json!({"other": "x"});
        let err = required_str(&body, "user_id").unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn required_str_extracts_present_field() {
        let body = serde_json::json!({"user_id": "u1"});
        assert_eq!(required_str(&body, "user_id").unwrap(), "u1");
    }
}
