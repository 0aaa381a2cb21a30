//! Transport seams.
//!
//! The balancer and the presence router only ever need "put session S on
//! channel C", "send M to channel C" and "notify user U". Implementations
//! live elsewhere (the in-process hub in `poolgrid-presence`, or an adapter
//! over a real realtime server).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("session not connected: {0}")]
    SessionClosed(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Realtime channel operations.
pub trait ChannelTransport: Send + Sync {
    /// Put a session on a channel. Returns `false` if it was already there.
    fn join(&self, channel: &str, user_id: &str, session_id: &str) -> TransportResult<bool>;

    /// Take a session off a channel. Leaving a channel the session is not on
    /// is not an error.
    fn leave(&self, channel: &str, user_id: &str, session_id: &str) -> TransportResult<()>;

    /// Whether the session is currently on the channel.
    fn is_present(&self, channel: &str, user_id: &str, session_id: &str) -> TransportResult<bool>;

    /// Broadcast a payload to every presence on the channel. Returns the
    /// number of sessions it was handed to.
    fn send(&self, channel: &str, payload: &serde_json::Value) -> TransportResult<usize>;
}

/// A one-off message to a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub content: serde_json::Value,
    pub code: i32,
}

impl Notification {
    /// Subject used when the balancer moves a member between pools.
    pub const POOL_MOVE: &'static str = "pool_move";

    /// A "you were moved" notice naming the source and destination pool ids.
    pub fn pool_move(recipient: &str, from_pool: &str, to_pool: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: Self::POOL_MOVE.to_string(),
            content: serde_json::json!({ "leave": from_pool, "enter": to_pool }),
            code: 1,
        }
    }

    /// Subject used when a point of interest is pushed.
    pub const BUILDING_UPDATE: &'static str = "building_update";

    /// A broadcast carrying one pushed point of interest. It has no single
    /// recipient and is meant for `Notifier::notify_all`.
    pub fn building_update(data: serde_json::Value) -> Self {
        Self {
            recipient: String::new(),
            subject: Self::BUILDING_UPDATE.to_string(),
            content: serde_json::json!({ "type": Self::BUILDING_UPDATE, "data": data }),
            code: 1,
        }
    }
}

/// Delivers notifications to users.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> TransportResult<()>;

    /// Deliver to every connected user, ignoring `recipient`. Returns the
    /// number of sessions reached.
    fn notify_all(&self, notification: Notification) -> TransportResult<usize>;
}
