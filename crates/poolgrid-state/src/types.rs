//! Domain types for the poolgrid state store.
//!
//! These types represent persisted objects, pools, memberships and points
//! of interest. All types are serializable to/from JSON for storage in redb
//! tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a pool.
pub type PoolId = String;

// ── Objects ───────────────────────────────────────────────────────

/// Who may read or write a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    None,
    Owner,
    Public,
}

/// A JSON value stored under a `(collection, key)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredObject {
    pub collection: String,
    pub key: String,
    pub value: serde_json::Value,
    pub read: Permission,
    pub write: Permission,
    /// Bumped on every write.
    pub version: u64,
    /// Unix timestamp (seconds) of the last write.
    pub updated_at: u64,
}

impl StoredObject {
    /// Build the composite key for the objects table.
    pub fn table_key(collection: &str, key: &str) -> String {
        format!("{collection}/{key}")
    }
}

// ── Pools ─────────────────────────────────────────────────────────

/// A capacity-bounded group of users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolRecord {
    pub id: PoolId,
    /// Unique display name, e.g. `AutoGroup_3`.
    pub name: String,
    /// User that triggered the creation.
    pub owner: String,
    pub capacity: u32,
    /// Open pools accept members without approval.
    pub open: bool,
    /// Creation order across all pools ever created.
    pub seq: u64,
    /// Unix timestamp (seconds) when the pool was created.
    pub created_at: u64,
}

/// Role of a user inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    Superadmin,
    Admin,
    Member,
    JoinRequest,
}

/// A user's membership in a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Membership {
    pub pool_id: PoolId,
    pub user_id: String,
    pub state: MemberState,
    /// Join order across all memberships ever created.
    pub seq: u64,
    /// Unix timestamp (seconds) when the user joined.
    pub joined_at: u64,
}

impl Membership {
    /// Build the composite key for the memberships table.
    pub fn table_key(pool_id: &str, user_id: &str) -> String {
        format!("{pool_id}:{user_id}")
    }
}

// ── Points of interest ────────────────────────────────────────────

/// A point of interest fetched from the content source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointOfInterest {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub image: Option<String>,
}

impl PointOfInterest {
    /// Build the key for the pois table.
    pub fn table_key(&self) -> String {
        self.id.to_string()
    }
}
