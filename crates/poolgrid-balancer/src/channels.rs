//! Best-effort side effects of a placement: pool channel presence and
//! move notifications.
//!
//! Membership in the store is the source of truth. Channel joins and
//! notifications that fail are logged and swallowed; the session can
//! rejoin its pool channel on a later event.

use std::sync::Arc;

use tracing::{debug, warn};

use poolgrid_core::{ChannelTransport, Notification, Notifier};
use poolgrid_state::PoolRecord;

#[derive(Clone)]
pub struct PoolChannels {
    transport: Arc<dyn ChannelTransport>,
    notifier: Arc<dyn Notifier>,
}

impl PoolChannels {
    pub fn new(transport: Arc<dyn ChannelTransport>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            transport,
            notifier,
        }
    }

    /// Put the session on the pool's channel (named after the pool).
    pub fn join(&self, pool: &PoolRecord, user_id: &str, session_id: &str) {
        match self.transport.join(&pool.name, user_id, session_id) {
            Ok(_) => debug!(pool = %pool.name, %user_id, "joined pool channel"),
            Err(e) => warn!(pool = %pool.name, %user_id, error = %e, "pool channel join failed"),
        }
    }

    pub fn leave(&self, pool: &PoolRecord, user_id: &str, session_id: &str) {
        if let Err(e) = self.transport.leave(&pool.name, user_id, session_id) {
            warn!(pool = %pool.name, %user_id, error = %e, "pool channel leave failed");
        }
    }

    /// Tell a migrated member which pool it left and which it entered.
    pub fn notify_move(&self, user_id: &str, from: &PoolRecord, to: &PoolRecord) {
        let notification = Notification::pool_move(user_id, &from.id, &to.id);
        if let Err(e) = self.notifier.notify(notification) {
            warn!(%user_id, from = %from.name, to = %to.name, error = %e, "move notification failed");
        }
    }
}
