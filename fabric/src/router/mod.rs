//! Cross-instance delivery (`spec.md` §4.4): fans a notification out to every
//! gateway instance via Redis pub/sub so a user connected to instance B
//! receives a push triggered on instance A.

mod backoff;
mod notifier;
mod publisher;
mod subscriber;

pub use backoff::ReconnectBackoff;
pub use notifier::RealtimeNotifier;
pub use publisher::{BROADCAST_CHANNEL, PublishError, Publisher, user_channel};
pub use subscriber::Subscriber;
