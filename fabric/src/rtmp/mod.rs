//! RTMP publish state machine (`spec.md` §4.9): a [`Reducer`](composable_rust_core::reducer::Reducer)
//! driven through a [`Store`](composable_rust_runtime::Store), as called for
//! in the data model (see `DESIGN.md` for why the state machine's actual
//! persistence still lives behind [`RtmpSessionStore`](composable_rust_core::rtmp_store::RtmpSessionStore)
//! rather than inside the `Store`'s own state).

mod reducer;
mod webhook;

pub use reducer::{RtmpAction, RtmpEnvironment, RtmpReducer, RtmpState};
pub use webhook::{RtmpStore, RtmpWebhookState, callback};
