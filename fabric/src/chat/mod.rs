//! Livestream chat room hub (`spec.md` §4.7): a WebSocket endpoint separate
//! from the notification gateway (§4.3), one room per `stream_id`.

mod frame;
mod handler;
mod rate_limit;
mod room;

pub use frame::{InboundChatFrame, OutboundChatFrame};
pub use handler::{ChatState, upgrade};
pub use rate_limit::SlidingWindowLimiter;
pub use room::{ChatRoom, ChatRoomRegistry};
