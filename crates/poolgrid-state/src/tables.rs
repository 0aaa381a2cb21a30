//! redb table definitions for the poolgrid state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow `{collection}/{key}` or `{pool_id}:{user_id}`.

use redb::TableDefinition;

/// Generic storage objects keyed by `{collection}/{key}`.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Pools keyed by `{pool_id}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Pool memberships keyed by `{pool_id}:{user_id}`.
pub const MEMBERSHIPS: TableDefinition<&str, &[u8]> = TableDefinition::new("memberships");

/// Points of interest keyed by `{id}`.
pub const POIS: TableDefinition<&str, &[u8]> = TableDefinition::new("pois");

/// Monotonic sequence counters keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
