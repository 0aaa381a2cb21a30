//! poolgrid-api — REST API for poolgrid.
//!
//! The host runtime forwards session lifecycle events and client RPCs
//! here. RPC callers are identified by the `x-user-id` / `x-session-id`
//! headers the runtime sets.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/sessions/connect` | Session opened: place the user |
//! | POST | `/api/v1/sessions/disconnect` | Session closed: remove the user |
//! | GET | `/api/v1/sessions/events` | Drain the caller's outbox |
//! | POST | `/api/v1/rpc/join_cell` | Join the cell for `{lat, lon}` |
//! | POST | `/api/v1/rpc/leave_cell` | Leave the cell for `{lat?, lon?}` |
//! | POST | `/api/v1/rpc/join_pool` | Join pool channel `{name}` |
//! | POST | `/api/v1/rpc/leave_pool` | Leave pool channel `{name}` |
//! | POST | `/api/v1/rpc/send_location` | Broadcast `{lat, lon, data}` to cell and pools |
//! | GET | `/api/v1/pools` | Pools with member counts |
//! | GET | `/api/v1/pois` | Cached points of interest |
//! | POST | `/api/v1/pois` | Push one point of interest and broadcast it |

pub mod error;
pub mod handlers;
pub mod rpc;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::{Mutex, mpsc};

use poolgrid_balancer::{Balancer, BalancerResult, PoolDirectory};
use poolgrid_core::{PoolgridConfig, SessionId};
use poolgrid_poi::{PoiCache, PoiSource};
use poolgrid_presence::{ChannelHub, Envelope, PresenceRouter, SessionLifecycle};
use poolgrid_state::StateStore;

pub use error::ApiError;

/// Receivers of attached sessions, drained by `/sessions/events`.
pub type Outboxes = Arc<Mutex<HashMap<SessionId, mpsc::Receiver<Envelope>>>>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: SessionLifecycle,
    pub router: PresenceRouter,
    pub pois: PoiCache,
    pub outboxes: Outboxes,
}

impl ApiState {
    pub fn new(lifecycle: SessionLifecycle, router: PresenceRouter, pois: PoiCache) -> Self {
        Self {
            lifecycle,
            router,
            pois,
            outboxes: Outboxes::default(),
        }
    }

    /// Wire balancer, hub, router and POI cache over one store.
    pub fn assemble(
        config: &PoolgridConfig,
        store: StateStore,
        source: Option<Arc<dyn PoiSource>>,
    ) -> BalancerResult<(Self, ChannelHub)> {
        let hub = ChannelHub::new();
        let balancer = Balancer::from_config(config, store.clone(), Arc::new(hub.clone()), Arc::new(hub.clone()))?;
        let router = PresenceRouter::new(Arc::new(hub.clone()), balancer.directory().clone());
        let lifecycle = SessionLifecycle::new(Arc::new(balancer), hub.clone());
        let pois = PoiCache::new(store, source).with_notifier(Arc::new(hub.clone()));
        Ok((Self::new(lifecycle, router, pois), hub))
    }

    pub fn directory(&self) -> &PoolDirectory {
        self.lifecycle.balancer().directory()
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/sessions/connect", post(handlers::connect))
        .route("/sessions/disconnect", post(handlers::disconnect))
        .route("/sessions/events", get(handlers::events))
        .route("/rpc/join_cell", post(rpc::join_cell))
        .route("/rpc/leave_cell", post(rpc::leave_cell))
        .route("/rpc/join_pool", post(rpc::join_pool))
        .route("/rpc/leave_pool", post(rpc::leave_pool))
        .route("/rpc/send_location", post(rpc::send_location))
        .route("/pools", get(handlers::list_pools))
        .route("/pois", get(handlers::list_pois).post(handlers::push_poi))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
