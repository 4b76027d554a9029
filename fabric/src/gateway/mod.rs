//! WebSocket gateway core (`spec.md` §4.3/§5): connection pool, dual-pump
//! lifecycle, and the `/ws` upgrade route.

mod auth;
mod connection;
mod frame;
mod handler;
mod pump;

pub use auth::AuthenticatedUserId;
pub use connection::{Connection, ConnectionId, ConnectionManager};
pub use frame::{NotificationPayload, NotificationPushFrame};
pub use handler::{GatewayState, upgrade};
