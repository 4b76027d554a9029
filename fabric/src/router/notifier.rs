//! The consumer-facing seam over [`super::publisher::Publisher`] (`spec.md`
//! §4.2's post-commit realtime publish).
//!
//! `NotificationStore` explicitly leaves this side effect to its caller (see
//! `composable_rust_core::notification_store`'s module docs), and the
//! consumer's own unit tests dispatch without a live Redis connection — so
//! this is a narrow capability trait in the same shape as the `core` crate's,
//! implemented for the real [`Publisher`] and faked in tests.

use crate::gateway::NotificationPushFrame;
use crate::router::publisher::{Publisher, PublishError};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability to push a rendered notification frame to a user's connections,
/// wherever they are connected.
pub trait RealtimeNotifier: Send + Sync {
    /// Publish `frame` to every connection `user_id` holds, on any instance.
    ///
    /// Failure is the caller's to log, not propagate — §4.2 treats the
    /// realtime push as best-effort once the notification itself is durably
    /// written.
    fn notify_user(&self, user_id: &str, frame: &NotificationPushFrame) -> BoxFuture<'_, Result<(), PublishError>>;
}

impl RealtimeNotifier for Publisher {
    fn notify_user(&self, user_id: &str, frame: &NotificationPushFrame) -> BoxFuture<'_, Result<(), PublishError>> {
        let user_id = user_id.to_string();
        let frame = frame.clone();
        Box::pin(async move { self.publish_to_user(&user_id, &frame).await })
    }
}

impl fmt::Debug for dyn RealtimeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn RealtimeNotifier")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::NotificationPayload;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, NotificationPushFrame)>>,
    }

    impl RealtimeNotifier for RecordingNotifier {
        fn notify_user(
            &self,
            user_id: &str,
            frame: &NotificationPushFrame,
        ) -> BoxFuture<'_, Result<(), PublishError>> {
            self.sent
                .lock()
                .expect("lock poisoned")
                .push((user_id.to_string(), frame.clone()));
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn recording_notifier_captures_calls() {
        let notifier = RecordingNotifier::default();
        let frame = NotificationPushFrame {
            event_type: "post.liked".to_string(),
            user_ids: vec!["u1".to_string()],
            payload: NotificationPayload {
                title: "New Like".to_string(),
                body: "a liked your post".to_string(),
                link: None,
                created_at: chrono::Utc::now(),
            },
        };
        notifier.notify_user("u1", &frame).await.expect("records");
        assert_eq!(notifier.sent.lock().expect("lock poisoned").len(), 1);
    }
}
