//! poolgrid-presence — realtime channels for poolgrid.
//!
//! - `hub`: in-process channel hub implementing the core transport traits
//! - `router`: cell and pool channel joins and fan-out
//! - `lifecycle`: connect/disconnect hooks wiring sessions to the balancer

pub mod hub;
pub mod lifecycle;
pub mod router;

pub use hub::{ChannelHub, Envelope, OUTBOX_CAPACITY, Presence};
pub use lifecycle::{Connected, Disconnected, SessionLifecycle};
pub use router::{
    Delivery, INVALID_ARGUMENT, LocationOutcome, LocationUpdate, PresenceRouter, RouterError,
    RouterResult,
};
