//! poolgrid-state — embedded state store for poolgrid.
//!
//! Backed by [redb](https://docs.rs/redb). Holds everything the balancer
//! treats as shared truth: generic `(collection, key)` objects (lock
//! records, counters), pools, pool memberships, and cached points of
//! interest.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{collection}/{key}`, `{pool_id}:{user_id}`) enable
//! prefix scans for related records. Creation and join order are kept as
//! monotonically increasing sequence numbers allocated inside the same
//! write transaction as the insert.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{Stage, StateError, StateResult};
pub use store::StateStore;
pub use types::*;
