//! In-process channel hub.
//!
//! Tracks which sessions sit on which channels and hands broadcast
//! messages and notifications to per-session outboxes. A transport front
//! end (the HTTP API, a websocket server) attaches a session, drains the
//! returned receiver, and detaches the session when it goes away.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use poolgrid_core::{
    ChannelTransport, Notification, Notifier, SessionId, TransportError, TransportResult, UserId,
};

/// Items buffered per session before new ones are dropped.
pub const OUTBOX_CAPACITY: usize = 256;

/// Something delivered to a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// A broadcast on a channel the session is present in.
    Stream {
        channel: String,
        payload: serde_json::Value,
    },
    Notification(Notification),
}

/// A session's presence on a channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Presence {
    pub session_id: SessionId,
    pub user_id: UserId,
}

struct Outbox {
    user_id: UserId,
    tx: mpsc::Sender<Envelope>,
}

#[derive(Default)]
struct HubInner {
    /// channel -> session -> user
    channels: RwLock<HashMap<String, HashMap<SessionId, UserId>>>,
    sessions: RwLock<HashMap<SessionId, Outbox>>,
}

#[derive(Clone, Default)]
pub struct ChannelHub {
    inner: Arc<HubInner>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an outbox for a session. Attaching an already attached session
    /// replaces its outbox; channel presences are kept.
    pub fn attach(&self, user_id: &str, session_id: &str) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let previous = self.inner.sessions.write().unwrap_or_else(PoisonError::into_inner).insert(
            session_id.to_string(),
            Outbox {
                user_id: user_id.to_string(),
                tx,
            },
        );
        debug!(%user_id, %session_id, replaced = previous.is_some(), "session attached");
        rx
    }

    /// Close the session's outbox and drop all of its channel presences.
    /// Returns the channels it was removed from.
    pub fn detach(&self, session_id: &str) -> Vec<String> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);

        let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
        let mut left = Vec::new();
        channels.retain(|name, members| {
            if members.remove(session_id).is_some() {
                left.push(name.clone());
            }
            !members.is_empty()
        });
        left.sort();
        debug!(%session_id, channels = left.len(), "session detached");
        left
    }

    pub fn is_attached(&self, session_id: &str) -> bool {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    /// Sessions on a channel, ordered by session id.
    pub fn presences(&self, channel: &str) -> Vec<Presence> {
        let channels = self.inner.channels.read().unwrap_or_else(PoisonError::into_inner);
        let mut presences: Vec<Presence> = channels
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .map(|(session_id, user_id)| Presence {
                        session_id: session_id.clone(),
                        user_id: user_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        presences.sort();
        presences
    }

    /// Channels a session is present in, sorted.
    pub fn channels_of(&self, session_id: &str) -> Vec<String> {
        let channels = self.inner.channels.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = channels
            .iter()
            .filter(|(_, members)| members.contains_key(session_id))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn deliver(&self, session_id: &str, outbox: &Outbox, envelope: Envelope) -> bool {
        match outbox.tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%session_id, user_id = %outbox.user_id, "outbox full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%session_id, "outbox closed");
                false
            }
        }
    }
}

impl ChannelTransport for ChannelHub {
    fn join(&self, channel: &str, user_id: &str, session_id: &str) -> TransportResult<bool> {
        if !self.is_attached(session_id) {
            return Err(TransportError::SessionClosed(session_id.to_string()));
        }
        let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
        let joined = channels
            .entry(channel.to_string())
            .or_default()
            .insert(session_id.to_string(), user_id.to_string())
            .is_none();
        debug!(%channel, %user_id, %session_id, joined, "channel join");
        Ok(joined)
    }

    fn leave(&self, channel: &str, user_id: &str, session_id: &str) -> TransportResult<()> {
        let mut channels = self.inner.channels.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(members) = channels.get_mut(channel) {
            members.remove(session_id);
            if members.is_empty() {
                channels.remove(channel);
            }
        }
        debug!(%channel, %user_id, %session_id, "channel leave");
        Ok(())
    }

    fn is_present(&self, channel: &str, _user_id: &str, session_id: &str) -> TransportResult<bool> {
        let channels = self.inner.channels.read().unwrap_or_else(PoisonError::into_inner);
        Ok(channels
            .get(channel)
            .is_some_and(|members| members.contains_key(session_id)))
    }

    fn send(&self, channel: &str, payload: &serde_json::Value) -> TransportResult<usize> {
        let targets: Vec<SessionId> = {
            let channels = self.inner.channels.read().unwrap_or_else(PoisonError::into_inner);
            channels
                .get(channel)
                .map(|members| members.keys().cloned().collect())
                .unwrap_or_default()
        };

        let sessions = self.inner.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for session_id in &targets {
            if let Some(outbox) = sessions.get(session_id) {
                let envelope = Envelope::Stream {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                };
                if self.deliver(session_id, outbox, envelope) {
                    delivered += 1;
                }
            }
        }
        debug!(%channel, delivered, presences = targets.len(), "channel send");
        Ok(delivered)
    }
}

impl Notifier for ChannelHub {
    fn notify(&self, notification: Notification) -> TransportResult<()> {
        let sessions = self.inner.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for (session_id, outbox) in sessions.iter() {
            if outbox.user_id == notification.recipient
                && self.deliver(session_id, outbox, Envelope::Notification(notification.clone()))
            {
                delivered += 1;
            }
        }
        if delivered == 0 {
            debug!(recipient = %notification.recipient, subject = %notification.subject, "no live session for notification");
        }
        Ok(())
    }

    fn notify_all(&self, notification: Notification) -> TransportResult<usize> {
        let sessions = self.inner.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for (session_id, outbox) in sessions.iter() {
            if self.deliver(session_id, outbox, Envelope::Notification(notification.clone())) {
                delivered += 1;
            }
        }
        debug!(subject = %notification.subject, delivered, sessions = sessions.len(), "notification broadcast");
        Ok(delivered)
    }
}
