//! Session connect/disconnect hooks.
//!
//! The host runtime calls these once per session. Connect opens the
//! session's outbox on the hub before placing the user, so the pool
//! channel join that follows placement finds the session attached.
//! Disconnect removes the user from its pool, then drops every channel
//! presence the session still holds.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use poolgrid_balancer::{Balancer, JoinOutcome, LeaveOutcome};

use crate::hub::{ChannelHub, Envelope};

/// Result of a connect hook.
pub struct Connected {
    /// Messages and notifications addressed to the new session.
    pub outbox: mpsc::Receiver<Envelope>,
    /// `None` when placement failed; the failure has been logged.
    pub outcome: Option<JoinOutcome>,
}

/// Result of a disconnect hook.
#[derive(Debug)]
pub struct Disconnected {
    /// `None` when departure bookkeeping failed; the failure has been logged.
    pub outcome: Option<LeaveOutcome>,
    /// Channels the session was still on when it was detached.
    pub channels: Vec<String>,
}

#[derive(Clone)]
pub struct SessionLifecycle {
    balancer: Arc<Balancer>,
    hub: ChannelHub,
}

impl SessionLifecycle {
    pub fn new(balancer: Arc<Balancer>, hub: ChannelHub) -> Self {
        Self { balancer, hub }
    }

    pub fn balancer(&self) -> &Balancer {
        &self.balancer
    }

    pub async fn on_connect(&self, user_id: &str, session_id: &str) -> Connected {
        let outbox = self.hub.attach(user_id, session_id);
        let outcome = match self.balancer.place(user_id, session_id).await {
            Ok(JoinOutcome::Contended) => {
                warn!(%user_id, %session_id, "placement skipped, join lock contended");
                Some(JoinOutcome::Contended)
            }
            Ok(outcome) => {
                if let Some(pool) = outcome.pool() {
                    info!(%user_id, %session_id, pool = %pool.name, "session connected");
                }
                Some(outcome)
            }
            Err(e) => {
                error!(%user_id, %session_id, error = %e, "placement failed");
                None
            }
        };
        Connected { outbox, outcome }
    }

    pub async fn on_disconnect(&self, user_id: &str, session_id: &str) -> Disconnected {
        let outcome = match self.balancer.remove(user_id, session_id).await {
            Ok(LeaveOutcome::Contended) => {
                warn!(%user_id, %session_id, "departure skipped, leave lock contended");
                Some(LeaveOutcome::Contended)
            }
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(%user_id, %session_id, error = %e, "departure failed");
                None
            }
        };
        let channels = self.hub.detach(session_id);
        info!(%user_id, %session_id, channels = channels.len(), "session disconnected");
        Disconnected { outcome, channels }
    }
}
