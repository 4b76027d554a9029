//! The `Reducer`/`Environment` pair driving the RTMP publish state machine.
//!
//! `RtmpSessionStore` (Postgres in production) remains the sole source of
//! truth for the state machine itself: its guarded `UPDATE ... WHERE
//! status = 'idle'` is what makes `on_publish` exclusive under concurrent
//! webhook delivery from the media server, something a `Store`'s in-process
//! `RwLock<State>` cannot provide once more than one fabric instance is
//! running behind the media server's callback URL. `RtmpState` here is a
//! mirror kept for `store.state()` reads, updated only after the real
//! transition has already landed.

use composable_rust_core::effect::Effect;
use composable_rust_core::reducer::Reducer;
use composable_rust_core::rtmp_store::{PublishOutcome, RtmpSessionStore, RtmpStoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// A one-shot reply channel embedded in an action, wrapped so the action
/// itself stays `Clone` (required by `Store::send`) even though the
/// channel's sender can only ever be taken once.
pub type Reply<T> = Arc<Mutex<Option<oneshot::Sender<T>>>>;

fn take_reply<T>(reply: &Reply<T>) -> Option<oneshot::Sender<T>> {
    reply.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Actions dispatched to the RTMP `Store`.
#[derive(Clone)]
pub enum RtmpAction {
    /// A media server `on_publish` callback arrived for `stream_id`.
    Publish {
        /// The `stream` field of the callback.
        stream_id: String,
        /// The token extracted from the callback's `param` field.
        token: String,
        /// Delivers the store's outcome back to the webhook handler.
        respond: Reply<Result<PublishOutcome, RtmpStoreError>>,
    },
    /// Feedback action: the publish transition finished.
    PublishCompleted {
        /// The stream the transition applied to.
        stream_id: String,
        /// The resulting outcome, mirrored into `RtmpState`.
        outcome: PublishOutcome,
    },
    /// A media server `on_unpublish` callback arrived for `stream_id`.
    Unpublish {
        /// The `stream` field of the callback.
        stream_id: String,
        /// Delivers the store's outcome back to the webhook handler.
        respond: Reply<Result<(), RtmpStoreError>>,
    },
    /// Feedback action: the unpublish transition finished.
    UnpublishCompleted {
        /// The stream the transition applied to.
        stream_id: String,
    },
}

/// Mirrored read model of the most recent outcome per stream.
#[derive(Debug, Clone, Default)]
pub struct RtmpState {
    last_publish_outcome: HashMap<String, PublishOutcome>,
}

impl RtmpState {
    /// The most recently observed publish outcome for `stream_id`, if any.
    #[must_use]
    pub fn last_publish_outcome(&self, stream_id: &str) -> Option<PublishOutcome> {
        self.last_publish_outcome.get(stream_id).copied()
    }
}

/// Dependencies the RTMP reducer's effects run against.
#[derive(Clone)]
pub struct RtmpEnvironment {
    /// The capability backing the actual publish state machine.
    pub store: Arc<dyn RtmpSessionStore>,
}

/// Business logic for the RTMP publish state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtmpReducer;

impl Reducer for RtmpReducer {
    type State = RtmpState;
    type Action = RtmpAction;
    type Environment = RtmpEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Vec<Effect<Self::Action>> {
        match action {
            RtmpAction::Publish { stream_id, token, respond } => {
                let store = Arc::clone(&env.store);
                vec![Effect::Future(Box::pin(async move {
                    let result = store.on_publish(&stream_id, &token).await;
                    if let Some(sender) = take_reply(&respond) {
                        let _ = sender.send(result.clone());
                    }
                    result.ok().map(|outcome| RtmpAction::PublishCompleted { stream_id, outcome })
                }))]
            }
            RtmpAction::PublishCompleted { stream_id, outcome } => {
                state.last_publish_outcome.insert(stream_id, outcome);
                vec![Effect::None]
            }
            RtmpAction::Unpublish { stream_id, respond } => {
                let store = Arc::clone(&env.store);
                vec![Effect::Future(Box::pin(async move {
                    let result = store.on_unpublish(&stream_id).await;
                    if let Some(sender) = take_reply(&respond) {
                        let _ = sender.send(result.clone());
                    }
                    result.ok().map(|()| RtmpAction::UnpublishCompleted { stream_id })
                }))]
            }
            RtmpAction::UnpublishCompleted { stream_id } => {
                state.last_publish_outcome.remove(&stream_id);
                vec![Effect::None]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composable_rust_core::rtmp_store::RtmpStatus;
    use composable_rust_runtime::Store;
    use composable_rust_testing::InMemoryRtmpSessionStore;

    fn store_with(stream_id: &str, token: &str) -> Store<RtmpState, RtmpAction, RtmpEnvironment, RtmpReducer> {
        let fake = InMemoryRtmpSessionStore::new().with_session(stream_id, token, RtmpStatus::Idle);
        let env = RtmpEnvironment { store: Arc::new(fake) };
        Store::new(RtmpState::default(), RtmpReducer, env)
    }

    #[tokio::test]
    async fn publish_with_matching_token_is_accepted_and_mirrored_into_state() {
        let store = store_with("s1", "tok");
        let (tx, rx) = oneshot::channel();
        let mut handle = store
            .send(RtmpAction::Publish {
                stream_id: "s1".to_string(),
                token: "tok".to_string(),
                respond: Arc::new(Mutex::new(Some(tx))),
            })
            .await;
        handle.wait().await;
        let outcome = rx.await.expect("reply channel should deliver").expect("store call should succeed");
        assert_eq!(outcome, PublishOutcome::Accepted);

        let mirrored = store.state(|s| s.last_publish_outcome("s1")).await;
        assert_eq!(mirrored, Some(PublishOutcome::Accepted));
    }

    #[tokio::test]
    async fn publish_with_wrong_token_is_rejected() {
        let store = store_with("s2", "tok");
        let (tx, rx) = oneshot::channel();
        let mut handle = store
            .send(RtmpAction::Publish {
                stream_id: "s2".to_string(),
                token: "wrong".to_string(),
                respond: Arc::new(Mutex::new(Some(tx))),
            })
            .await;
        handle.wait().await;
        let outcome = rx.await.expect("reply channel should deliver").expect("store call should succeed");
        assert_eq!(outcome, PublishOutcome::TokenMismatch);
    }

    #[tokio::test]
    async fn unpublish_completion_clears_the_mirror() {
        let store = store_with("s3", "tok");
        let (tx, rx) = oneshot::channel();
        let mut publish_handle = store
            .send(RtmpAction::Publish {
                stream_id: "s3".to_string(),
                token: "tok".to_string(),
                respond: Arc::new(Mutex::new(Some(tx))),
            })
            .await;
        publish_handle.wait().await;
        rx.await.expect("reply").expect("accepted");

        let (tx2, rx2) = oneshot::channel();
        let mut unpublish_handle = store
            .send(RtmpAction::Unpublish {
                stream_id: "s3".to_string(),
                respond: Arc::new(Mutex::new(Some(tx2))),
            })
            .await;
        unpublish_handle.wait().await;
        rx2.await.expect("reply").expect("unpublish should succeed");

        let mirrored = store.state(|s| s.last_publish_outcome("s3")).await;
        assert_eq!(mirrored, None);
    }
}
