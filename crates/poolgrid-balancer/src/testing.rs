//! Recording transport doubles shared by the balancer tests.

use std::collections::HashSet;
use std::sync::Mutex;

use poolgrid_core::{
    ChannelTransport, Notification, Notifier, TransportError, TransportResult,
};

/// Keeps channel presences in memory and records every notification.
#[derive(Default)]
pub struct RecordingTransport {
    presences: Mutex<HashSet<(String, String)>>,
    notifications: Mutex<Vec<Notification>>,
    fail_joins: bool,
}

impl RecordingTransport {
    pub fn failing_joins() -> Self {
        Self {
            fail_joins: true,
            ..Self::default()
        }
    }

    pub fn on_channel(&self, channel: &str, session_id: &str) -> bool {
        self.presences
            .lock()
            .unwrap()
            .contains(&(channel.to_string(), session_id.to_string()))
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

impl ChannelTransport for RecordingTransport {
    fn join(&self, channel: &str, _user_id: &str, session_id: &str) -> TransportResult<bool> {
        if self.fail_joins {
            return Err(TransportError::Unavailable("join disabled".to_string()));
        }
        Ok(self
            .presences
            .lock()
            .unwrap()
            .insert((channel.to_string(), session_id.to_string())))
    }

    fn leave(&self, channel: &str, _user_id: &str, session_id: &str) -> TransportResult<()> {
        self.presences
            .lock()
            .unwrap()
            .remove(&(channel.to_string(), session_id.to_string()));
        Ok(())
    }

    fn is_present(&self, channel: &str, _user_id: &str, session_id: &str) -> TransportResult<bool> {
        Ok(self.on_channel(channel, session_id))
    }

    fn send(&self, channel: &str, _payload: &serde_json::Value) -> TransportResult<usize> {
        Ok(self
            .presences
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .count())
    }
}

impl Notifier for RecordingTransport {
    fn notify(&self, notification: Notification) -> TransportResult<()> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }

    fn notify_all(&self, notification: Notification) -> TransportResult<usize> {
        self.notifications.lock().unwrap().push(notification);
        Ok(1)
    }
}
