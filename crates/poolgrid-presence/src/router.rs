//! Presence router — cell and pool channel membership and fan-out.
//!
//! Every user message travels on two independent paths: the proximity
//! cell derived from the reported coordinates, and the pool channels the
//! session currently sits on. The two sends are not atomic; each reports
//! its own outcome.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};

use poolgrid_balancer::PoolDirectory;
use poolgrid_core::{CellId, ChannelTransport, Coordinates, TransportError};
use poolgrid_state::StateError;

/// Status code carried by input errors.
pub const INVALID_ARGUMENT: i32 = 3;
/// Status code carried by collaborator failures.
pub const INTERNAL: i32 = 13;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("pool lookup failed: {0}")]
    Directory(#[from] StateError),
}

impl RouterError {
    /// Errors caused by the caller's payload rather than a collaborator.
    pub fn is_input(&self) -> bool {
        matches!(self, RouterError::InvalidArgument(_))
    }

    pub fn code(&self) -> i32 {
        match self {
            RouterError::InvalidArgument(_) => INVALID_ARGUMENT,
            _ => INTERNAL,
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;

/// What a broadcast reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Delivered {
        channels: Vec<String>,
        recipients: usize,
    },
    /// No channel was eligible for this send.
    NotDelivered,
}

/// A location report: coordinates plus an opaque payload. Every field is
/// required; they are optional here so missing ones surface as input
/// errors instead of decode failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationUpdate {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub data: Option<Value>,
}

/// Outcomes of the two sends of a location report.
#[derive(Debug)]
pub struct LocationOutcome {
    pub cell: RouterResult<Delivery>,
    pub pool: RouterResult<Delivery>,
}

impl LocationOutcome {
    pub fn is_ok(&self) -> bool {
        self.cell.is_ok() && self.pool.is_ok()
    }

    /// Both deliveries, or the first failure (cell before pool).
    pub fn into_result(self) -> RouterResult<(Delivery, Delivery)> {
        Ok((self.cell?, self.pool?))
    }
}

#[derive(Clone)]
pub struct PresenceRouter {
    transport: Arc<dyn ChannelTransport>,
    directory: PoolDirectory,
}

impl PresenceRouter {
    pub fn new(transport: Arc<dyn ChannelTransport>, directory: PoolDirectory) -> Self {
        Self {
            transport,
            directory,
        }
    }

    /// Put the session on the cell for `(lat, lon)`.
    pub fn join_cell(&self, user_id: &str, session_id: &str, lat: f64, lon: f64) -> RouterResult<CellId> {
        let cell = CellId::from_coords(lat, lon);
        self.transport.join(cell.as_str(), user_id, session_id)?;
        debug!(%user_id, %cell, "joined cell");
        Ok(cell)
    }

    /// Leave the cell for `coords`. Without coordinates nothing happens.
    pub fn leave_cell(
        &self,
        user_id: &str,
        session_id: &str,
        coords: Option<Coordinates>,
    ) -> RouterResult<Option<CellId>> {
        let Some(coords) = coords else {
            return Ok(None);
        };
        let cell = coords.cell();
        self.transport.leave(cell.as_str(), user_id, session_id)?;
        debug!(%user_id, %cell, "left cell");
        Ok(Some(cell))
    }

    /// Broadcast `data` on the cell for `(lat, lon)`.
    pub fn send_to_cell(
        &self,
        user_id: &str,
        lat: Option<f64>,
        lon: Option<f64>,
        data: Option<Value>,
    ) -> RouterResult<Delivery> {
        let (Some(lat), Some(lon), Some(data)) = (lat, lon, data) else {
            return Err(RouterError::InvalidArgument(
                "missing lat, lon, or data fields".to_string(),
            ));
        };
        let cell = CellId::from_coords(lat, lon);
        let payload = message(user_id, data, false);
        let recipients = self.transport.send(cell.as_str(), &payload)?;
        debug!(%user_id, %cell, recipients, "cell broadcast");
        Ok(Delivery::Delivered {
            channels: vec![cell.to_string()],
            recipients,
        })
    }

    /// Broadcast `data` on every pool channel this session is on.
    ///
    /// Per-channel lookup or send failures are logged and skipped.
    pub fn send_to_pool(&self, user_id: &str, session_id: &str, data: Value) -> RouterResult<Delivery> {
        let pools = self.directory.pools_of(user_id)?;
        if pools.is_empty() {
            debug!(%user_id, "user has no pool, nothing sent");
            return Ok(Delivery::NotDelivered);
        }

        let payload = message(user_id, data, true);
        let mut channels = Vec::new();
        let mut recipients = 0;
        for pool in &pools {
            match self.transport.is_present(&pool.name, user_id, session_id) {
                Ok(true) => match self.transport.send(&pool.name, &payload) {
                    Ok(n) => {
                        channels.push(pool.name.clone());
                        recipients += n;
                    }
                    Err(e) => error!(pool = %pool.name, %user_id, error = %e, "pool broadcast failed"),
                },
                Ok(false) => debug!(pool = %pool.name, %session_id, "session not on pool channel"),
                Err(e) => error!(pool = %pool.name, %user_id, error = %e, "presence lookup failed"),
            }
        }

        if channels.is_empty() {
            return Ok(Delivery::NotDelivered);
        }
        Ok(Delivery::Delivered {
            channels,
            recipients,
        })
    }

    /// Send a location report to its cell and to the user's pools.
    ///
    /// Input is validated up front; after that both sends are attempted
    /// even if the first fails, and nothing is rolled back.
    pub fn send_location(
        &self,
        user_id: &str,
        session_id: &str,
        update: LocationUpdate,
    ) -> RouterResult<LocationOutcome> {
        let LocationUpdate {
            lat: Some(lat),
            lon: Some(lon),
            data: Some(data),
        } = update
        else {
            return Err(RouterError::InvalidArgument(
                "missing lat, lon, or data fields".to_string(),
            ));
        };

        let cell = self.send_to_cell(user_id, Some(lat), Some(lon), Some(data.clone()));
        if let Err(e) = &cell {
            error!(%user_id, error = %e, "failed to send to cell channel");
        }
        let pool = self.send_to_pool(user_id, session_id, data);
        if let Err(e) = &pool {
            error!(%user_id, error = %e, "failed to send to pool channels");
        }
        Ok(LocationOutcome { cell, pool })
    }

    /// Put the session on a pool channel by name. The balancer is not
    /// consulted.
    pub fn join_pool(&self, user_id: &str, session_id: &str, name: &str) -> RouterResult<bool> {
        let name = pool_channel(name)?;
        let joined = self.transport.join(name, user_id, session_id)?;
        if !joined {
            warn!(%user_id, pool = %name, "session already on pool channel");
        }
        Ok(joined)
    }

    pub fn leave_pool(&self, user_id: &str, session_id: &str, name: &str) -> RouterResult<()> {
        let name = pool_channel(name)?;
        self.transport.leave(name, user_id, session_id)?;
        Ok(())
    }
}

fn pool_channel(name: &str) -> RouterResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RouterError::InvalidArgument("pool name is empty".to_string()));
    }
    Ok(name)
}

fn message(user_id: &str, data: Value, from_pool: bool) -> Value {
    json!({
        "user_id": user_id,
        "data": data,
        "from_pool": from_pool,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ChannelHub, Envelope};
    use poolgrid_state::StateStore;

    struct Fixture {
        hub: ChannelHub,
        router: PresenceRouter,
        directory: PoolDirectory,
    }

    fn fixture() -> Fixture {
        let hub = ChannelHub::new();
        let directory = PoolDirectory::new(StateStore::open_in_memory().unwrap());
        let router = PresenceRouter::new(Arc::new(hub.clone()), directory.clone());
        Fixture {
            hub,
            router,
            directory,
        }
    }

    #[test]
    fn join_cell_uses_six_decimal_name() {
        let f = fixture();
        let _rx = f.hub.attach("u1", "s1");
        let cell = f.router.join_cell("u1", "s1", 1.0, 2.0).unwrap();
        assert_eq!(cell.as_str(), "cell_1.000000_2.000000");
        assert_eq!(f.hub.channels_of("s1"), vec!["cell_1.000000_2.000000"]);
    }

    #[test]
    fn leave_cell_without_coordinates_is_noop() {
        let f = fixture();
        let _rx = f.hub.attach("u1", "s1");
        f.router.join_cell("u1", "s1", 0.0, 0.0).unwrap();

        assert_eq!(f.router.leave_cell("u1", "s1", None).unwrap(), None);
        assert_eq!(f.router.leave_cell("u1", "s1", None).unwrap(), None);
        assert_eq!(f.hub.channels_of("s1"), vec!["cell_0.000000_0.000000"]);

        // The equator/prime meridian cell is a real cell.
        let left = f.router.leave_cell("u1", "s1", Some(Coordinates::new(0.0, 0.0))).unwrap();
        assert_eq!(left.unwrap().as_str(), "cell_0.000000_0.000000");
        assert!(f.hub.channels_of("s1").is_empty());
    }

    #[test]
    fn send_to_cell_requires_all_fields() {
        let f = fixture();
        for (lat, lon, data) in [
            (None, Some(2.0), Some(json!(1))),
            (Some(1.0), None, Some(json!(1))),
            (Some(1.0), Some(2.0), None),
        ] {
            let err = f.router.send_to_cell("u1", lat, lon, data).unwrap_err();
            assert!(err.is_input());
            assert_eq!(err.code(), INVALID_ARGUMENT);
        }
    }

    #[test]
    fn send_to_cell_marks_message_as_not_from_pool() {
        let f = fixture();
        let mut rx = f.hub.attach("u2", "s2");
        f.router.join_cell("u2", "s2", 1.0, 2.0).unwrap();

        let delivery = f
            .router
            .send_to_cell("u1", Some(1.0), Some(2.0), Some(json!({"msg": "hi"})))
            .unwrap();
        assert_eq!(
            delivery,
            Delivery::Delivered {
                channels: vec!["cell_1.000000_2.000000".to_string()],
                recipients: 1
            }
        );
        let Envelope::Stream { payload, .. } = rx.try_recv().unwrap() else {
            panic!("expected stream message");
        };
        assert_eq!(payload, json!({"user_id": "u1", "data": {"msg": "hi"}, "from_pool": false}));
    }

    #[test]
    fn send_to_pool_without_pools_is_not_delivered() {
        let f = fixture();
        let _rx = f.hub.attach("u1", "s1");
        assert_eq!(f.router.send_to_pool("u1", "s1", json!(1)).unwrap(), Delivery::NotDelivered);
    }

    #[test]
    fn send_to_pool_skips_channels_the_session_left() {
        let f = fixture();
        let _rx = f.hub.attach("u1", "s1");
        let pool = f.directory.create("u1", "Group_1", 5).unwrap();
        f.directory.add_members(&pool.id, &["u1"]).unwrap();

        assert_eq!(f.router.send_to_pool("u1", "s1", json!(1)).unwrap(), Delivery::NotDelivered);

        f.router.join_pool("u1", "s1", "Group_1").unwrap();
        let delivery = f.router.send_to_pool("u1", "s1", json!(1)).unwrap();
        assert_eq!(
            delivery,
            Delivery::Delivered {
                channels: vec!["Group_1".to_string()],
                recipients: 1
            }
        );
    }

    #[test]
    fn send_location_reaches_cell_and_pool() {
        let f = fixture();
        let _sender = f.hub.attach("u1", "s1");
        let mut cell_peer = f.hub.attach("u2", "s2");
        let mut pool_peer = f.hub.attach("u3", "s3");

        let pool = f.directory.create("u1", "Group_3", 5).unwrap();
        f.directory.add_members(&pool.id, &["u1", "u3"]).unwrap();
        f.router.join_pool("u1", "s1", "Group_3").unwrap();
        f.router.join_pool("u3", "s3", "Group_3").unwrap();
        f.router.join_cell("u2", "s2", 1.0, 2.0).unwrap();

        let update = LocationUpdate {
            lat: Some(1.0),
            lon: Some(2.0),
            data: Some(json!({"msg": "hi"})),
        };
        let outcome = f.router.send_location("u1", "s1", update).unwrap();
        assert!(outcome.is_ok());
        let (cell, pool) = outcome.into_result().unwrap();
        assert!(matches!(cell, Delivery::Delivered { ref channels, .. } if channels == &["cell_1.000000_2.000000"]));
        assert!(matches!(pool, Delivery::Delivered { ref channels, .. } if channels == &["Group_3"]));

        let Envelope::Stream { channel, payload } = cell_peer.try_recv().unwrap() else {
            panic!("expected cell message");
        };
        assert_eq!(channel, "cell_1.000000_2.000000");
        assert_eq!(payload["from_pool"], json!(false));

        let Envelope::Stream { channel, payload } = pool_peer.try_recv().unwrap() else {
            panic!("expected pool message");
        };
        assert_eq!(channel, "Group_3");
        assert_eq!(payload["from_pool"], json!(true));
        assert_eq!(payload["data"], json!({"msg": "hi"}));
    }

    #[test]
    fn send_location_rejects_partial_update() {
        let f = fixture();
        let update = LocationUpdate {
            lat: Some(1.0),
            lon: Some(2.0),
            data: None,
        };
        assert!(f.router.send_location("u1", "s1", update).unwrap_err().is_input());
    }

    #[test]
    fn join_pool_rejects_empty_name() {
        let f = fixture();
        let _rx = f.hub.attach("u1", "s1");
        assert!(f.router.join_pool("u1", "s1", "  ").unwrap_err().is_input());
        assert!(f.router.leave_pool("u1", "s1", "").unwrap_err().is_input());
    }

    #[test]
    fn join_pool_on_detached_session_is_transport_error() {
        let f = fixture();
        let err = f.router.join_pool("u1", "gone", "Group_1").unwrap_err();
        assert!(matches!(err, RouterError::Transport(TransportError::SessionClosed(_))));
        assert!(!err.is_input());
    }

    #[test]
    fn join_and_leave_pool_by_name() {
        let f = fixture();
        let _rx = f.hub.attach("u1", "s1");
        assert!(f.router.join_pool("u1", "s1", "Group_7").unwrap());
        assert!(!f.router.join_pool("u1", "s1", "Group_7").unwrap());
        f.router.leave_pool("u1", "s1", "Group_7").unwrap();
        assert!(f.hub.channels_of("s1").is_empty());
    }
}
