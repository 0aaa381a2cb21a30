//! poolgrid-core — types shared by every poolgrid crate.
//!
//! Holds the `poolgrid.toml` configuration model, user/session identifiers,
//! the coordinate → cell mapping, and the transport traits the balancer and
//! presence router talk to.

pub mod config;
pub mod transport;
pub mod types;

pub use config::{BalancerConfig, BalancerMode, ConfigError, LockConfig, PoiConfig, PoolgridConfig, ServerConfig};
pub use transport::{ChannelTransport, Notification, Notifier, TransportError, TransportResult};
pub use types::*;
