//! StateStore — redb-backed state persistence for poolgrid.
//!
//! Provides typed operations over generic objects, pools, memberships and
//! points of interest. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).
//!
//! redb serializes write transactions, so every read-modify-write that runs
//! inside one `begin_write` (object updates, pool creation, member adds) is
//! atomic with respect to other writers.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::debug;

use crate::error::{Stage, StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    (Serialize) => {
        StateError::Codec
    };
    (Deserialize) => {
        StateError::Codec
    };
    ($stage:ident) => {
        |e| StateError::storage(Stage::$stage, e)
    };
}

const POOL_SEQ: &str = "pool";
const MEMBER_SEQ: &str = "member";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        txn.open_table(POIS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Objects ────────────────────────────────────────────────────

    /// Get an object by collection and key.
    pub fn get_object(&self, collection: &str, key: &str) -> StateResult<Option<StoredObject>> {
        let table_key = StoredObject::table_key(collection, key);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        match table.get(table_key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let obj: StoredObject =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    /// Insert or overwrite an object.
    pub fn put_object(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
        read: Permission,
        write: Permission,
    ) -> StateResult<StoredObject> {
        self.update_object(collection, key, read, write, |_| Some(value))?
            .ok_or_else(|| StateError::storage(Stage::Write, format!("{collection}/{key} not written")))
    }

    /// Read-modify-write an object inside a single write transaction.
    ///
    /// `f` sees the current object (if any) and returns the new value, or
    /// `None` to leave the object untouched. Returns the written object.
    pub fn update_object<F>(
        &self,
        collection: &str,
        key: &str,
        read: Permission,
        write: Permission,
        f: F,
    ) -> StateResult<Option<StoredObject>>
    where
        F: FnOnce(Option<&StoredObject>) -> Option<serde_json::Value>,
    {
        let table_key = StoredObject::table_key(collection, key);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let written = {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            let current: Option<StoredObject> =
                match table.get(table_key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };

            match f(current.as_ref()) {
                Some(value) => {
                    let obj = StoredObject {
                        collection: collection.to_string(),
                        key: key.to_string(),
                        value,
                        read,
                        write,
                        version: current.map_or(1, |c| c.version + 1),
                        updated_at: epoch_secs(),
                    };
                    let bytes = serde_json::to_vec(&obj).map_err(map_err!(Serialize))?;
                    table
                        .insert(table_key.as_str(), bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(obj)
                }
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if written.is_some() {
            debug!(key = %table_key, "object stored");
        }
        Ok(written)
    }

    /// List all objects in a collection.
    pub fn list_objects(&self, collection: &str) -> StateResult<Vec<StoredObject>> {
        let prefix = format!("{collection}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let obj: StoredObject =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(obj);
            }
        }
        Ok(results)
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Create a pool with a unique name.
    ///
    /// Fails with [`StateError::PoolNameTaken`] if the name is already taken.
    pub fn create_pool(
        &self,
        name: &str,
        owner: &str,
        capacity: u32,
        open: bool,
    ) -> StateResult<PoolRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq = next_seq(&txn, POOL_SEQ)?;
        let pool = {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let existing: PoolRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if existing.name == name {
                    return Err(StateError::PoolNameTaken(name.to_string()));
                }
            }

            let pool = PoolRecord {
                id: format!("pool-{seq}"),
                name: name.to_string(),
                owner: owner.to_string(),
                capacity,
                open,
                seq,
                created_at: epoch_secs(),
            };
            let bytes = serde_json::to_vec(&pool).map_err(map_err!(Serialize))?;
            table
                .insert(pool.id.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
            pool
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool_id = %pool.id, name = %pool.name, "pool created");
        Ok(pool)
    }

    /// Get a pool by ID.
    pub fn get_pool(&self, pool_id: &str) -> StateResult<Option<PoolRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        match table.get(pool_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let pool: PoolRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(pool))
            }
            None => Ok(None),
        }
    }

    /// Find a pool by its display name.
    pub fn find_pool_by_name(&self, name: &str) -> StateResult<Option<PoolRecord>> {
        Ok(self.list_pools()?.into_iter().find(|p| p.name == name))
    }

    /// List all pools in creation order.
    pub fn list_pools(&self) -> StateResult<Vec<PoolRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let pool: PoolRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(pool);
        }
        results.sort_by_key(|p| p.seq);
        Ok(results)
    }

    /// Delete a pool and any membership rows still pointing at it.
    /// Returns true if the pool existed.
    pub fn delete_pool(&self, pool_id: &str) -> StateResult<bool> {
        let prefix = format!("{pool_id}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let orphans;
        {
            let mut pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
            existed = pools.remove(pool_id).map_err(map_err!(Write))?.is_some();

            let mut members = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
            let keys: Vec<String> = members
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect();
            for key in &keys {
                members.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            orphans = keys.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%pool_id, existed, orphans, "pool deleted");
        Ok(existed)
    }

    // ── Memberships ────────────────────────────────────────────────

    /// Add a user to a pool. Returns false if the user was already a member
    /// (the original join order is kept).
    pub fn add_member(&self, pool_id: &str, user_id: &str, state: MemberState) -> StateResult<bool> {
        let key = Membership::table_key(pool_id, user_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
            if pools.get(pool_id).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::PoolNotFound(pool_id.to_string()));
            }
        }
        {
            let members = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
            if members.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Ok(false);
            }
        }
        insert_membership(&txn, pool_id, user_id, state)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%pool_id, %user_id, "member added");
        Ok(true)
    }

    /// Remove a user from a pool. Returns true if the user was a member.
    pub fn remove_member(&self, pool_id: &str, user_id: &str) -> StateResult<bool> {
        let key = Membership::table_key(pool_id, user_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%pool_id, %user_id, existed, "member removed");
        Ok(existed)
    }

    /// Move a user from one pool to another in a single write transaction.
    ///
    /// Returns false, changing nothing, if the user is no longer a member of
    /// `from_pool`. The user rejoins at the end of `to_pool`'s join order.
    pub fn move_member(&self, from_pool: &str, to_pool: &str, user_id: &str) -> StateResult<bool> {
        let from_key = Membership::table_key(from_pool, user_id);
        let to_key = Membership::table_key(to_pool, user_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
            if pools.get(to_pool).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::PoolNotFound(to_pool.to_string()));
            }
        }
        let already_there;
        {
            let mut members = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
            if members.remove(from_key.as_str()).map_err(map_err!(Write))?.is_none() {
                return Ok(false);
            }
            already_there = members.get(to_key.as_str()).map_err(map_err!(Read))?.is_some();
        }
        if !already_there {
            insert_membership(&txn, to_pool, user_id, MemberState::Member)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%from_pool, %to_pool, %user_id, "member moved");
        Ok(true)
    }

    /// List the members of a pool in join order.
    pub fn list_members(&self, pool_id: &str) -> StateResult<Vec<Membership>> {
        let prefix = format!("{pool_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let membership: Membership =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(membership);
            }
        }
        results.sort_by_key(|m| m.seq);
        Ok(results)
    }

    /// Number of members in a pool.
    pub fn count_members(&self, pool_id: &str) -> StateResult<usize> {
        Ok(self.list_members(pool_id)?.len())
    }

    /// Pools the user belongs to, in creation order.
    pub fn pools_for_user(&self, user_id: &str) -> StateResult<Vec<PoolRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let members = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
        let mut pool_ids = Vec::new();
        for entry in members.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let membership: Membership =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if membership.user_id == user_id {
                pool_ids.push(membership.pool_id);
            }
        }

        let pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for pool_id in &pool_ids {
            if let Some(guard) = pools.get(pool_id.as_str()).map_err(map_err!(Read))? {
                let pool: PoolRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                results.push(pool);
            }
        }
        results.sort_by_key(|p| p.seq);
        Ok(results)
    }

    // ── Points of interest ─────────────────────────────────────────

    /// Insert or update a point of interest.
    pub fn put_poi(&self, poi: &PointOfInterest) -> StateResult<()> {
        let key = poi.table_key();
        let value = serde_json::to_vec(poi).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POIS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Replace the whole POI set in one transaction.
    pub fn replace_pois(&self, pois: &[PointOfInterest]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POIS).map_err(map_err!(Table))?;
            let keys: Vec<String> = table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    Some(key.value().to_string())
                })
                .collect();
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for poi in pois {
                let value = serde_json::to_vec(poi).map_err(map_err!(Serialize))?;
                table
                    .insert(poi.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = pois.len(), "points of interest replaced");
        Ok(())
    }

    /// List all points of interest ordered by ID.
    pub fn list_pois(&self) -> StateResult<Vec<PointOfInterest>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POIS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let poi: PointOfInterest =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(poi);
        }
        results.sort_by_key(|p| p.id);
        Ok(results)
    }

    /// Number of cached points of interest.
    pub fn count_pois(&self) -> StateResult<usize> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POIS).map_err(map_err!(Table))?;
        Ok(table.iter().map_err(map_err!(Read))?.count())
    }
}

/// Write a membership row with a fresh join sequence number.
fn insert_membership(
    txn: &WriteTransaction,
    pool_id: &str,
    user_id: &str,
    state: MemberState,
) -> StateResult<()> {
    let seq = next_seq(txn, MEMBER_SEQ)?;
    let membership = Membership {
        pool_id: pool_id.to_string(),
        user_id: user_id.to_string(),
        state,
        seq,
        joined_at: epoch_secs(),
    };
    let bytes = serde_json::to_vec(&membership).map_err(map_err!(Serialize))?;
    let mut members = txn.open_table(MEMBERSHIPS).map_err(map_err!(Table))?;
    members
        .insert(Membership::table_key(pool_id, user_id).as_str(), bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Allocate the next value of a named sequence inside `txn`.
fn next_seq(txn: &WriteTransaction, name: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table.get(name).map_err(map_err!(Read))?.map(|g| g.value());
    let next = current.unwrap_or(0) + 1;
    table.insert(name, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn test_poi(id: u64) -> PointOfInterest {
        PointOfInterest {
            id,
            lat: 52.52,
            lon: 13.405,
            image: Some(format!("http://cdn/{id}.png")),
        }
    }

    // ── Objects ────────────────────────────────────────────────────

    #[test]
    fn object_put_and_get() {
        let store = test_store();
        let value = serde_json::json!({ "locked": true });
        store
            .put_object("locks", "join_lock", value.clone(), Permission::Public, Permission::Public)
            .unwrap();

        let obj = store.get_object("locks", "join_lock").unwrap().unwrap();
        assert_eq!(obj.value, value);
        assert_eq!(obj.version, 1);
        assert_eq!(obj.read, Permission::Public);
    }

    #[test]
    fn object_get_nonexistent_returns_none() {
        let store = test_store();
        assert!(store.get_object("locks", "nope").unwrap().is_none());
    }

    #[test]
    fn object_overwrite_bumps_version() {
        let store = test_store();
        for locked in [true, false, true] {
            store
                .put_object(
                    "locks",
                    "leave_lock",
                    serde_json::json!({ "locked": locked }),
                    Permission::Public,
                    Permission::Public,
                )
                .unwrap();
        }
        let obj = store.get_object("locks", "leave_lock").unwrap().unwrap();
        assert_eq!(obj.version, 3);
        assert_eq!(obj.value["locked"], true);
    }

    #[test]
    fn update_object_can_decline_write() {
        let store = test_store();
        let written = store
            .update_object("balancer", "cursor", Permission::Public, Permission::Public, |_| None)
            .unwrap();
        assert!(written.is_none());
        assert!(store.get_object("balancer", "cursor").unwrap().is_none());
    }

    #[test]
    fn update_object_sees_current_value() {
        let store = test_store();
        for _ in 0..3 {
            store
                .update_object("balancer", "counter", Permission::Public, Permission::Public, |cur| {
                    let n = cur.and_then(|o| o.value.as_u64()).unwrap_or(0);
                    Some(serde_json::json!(n + 1))
                })
                .unwrap();
        }
        let obj = store.get_object("balancer", "counter").unwrap().unwrap();
        assert_eq!(obj.value, serde_json::json!(3));
    }

    #[test]
    fn list_objects_scoped_to_collection() {
        let store = test_store();
        let v = serde_json::json!(1);
        store.put_object("a", "x", v.clone(), Permission::Public, Permission::Public).unwrap();
        store.put_object("a", "y", v.clone(), Permission::Public, Permission::Public).unwrap();
        store.put_object("ab", "z", v, Permission::Public, Permission::Public).unwrap();

        assert_eq!(store.list_objects("a").unwrap().len(), 2);
        assert_eq!(store.list_objects("ab").unwrap().len(), 1);
    }

    // ── Pools ──────────────────────────────────────────────────────

    #[test]
    fn pool_create_and_list_in_creation_order() {
        let store = test_store();
        let a = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        let b = store.create_pool("AutoGroup_2", "u2", 5, true).unwrap();
        let c = store.create_pool("AutoGroup_3", "u3", 5, true).unwrap();

        let names: Vec<String> = store.list_pools().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["AutoGroup_1", "AutoGroup_2", "AutoGroup_3"]);
        assert!(a.seq < b.seq && b.seq < c.seq);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn pool_name_must_be_unique() {
        let store = test_store();
        store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        let err = store.create_pool("AutoGroup_1", "u2", 5, true).unwrap_err();
        assert!(matches!(err, StateError::PoolNameTaken(_)));
        assert_eq!(store.list_pools().unwrap().len(), 1);
    }

    #[test]
    fn pool_ids_are_not_reused_after_delete() {
        let store = test_store();
        let first = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        assert!(store.delete_pool(&first.id).unwrap());
        let second = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn pool_delete_drops_memberships() {
        let store = test_store();
        let pool = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        store.add_member(&pool.id, "u1", MemberState::Member).unwrap();

        assert!(store.delete_pool(&pool.id).unwrap());
        assert!(!store.delete_pool(&pool.id).unwrap());
        assert!(store.list_members(&pool.id).unwrap().is_empty());
        assert!(store.pools_for_user("u1").unwrap().is_empty());
    }

    #[test]
    fn find_pool_by_name() {
        let store = test_store();
        let pool = store.create_pool("Lobby", "u1", 5, true).unwrap();
        assert_eq!(store.find_pool_by_name("Lobby").unwrap(), Some(pool));
        assert!(store.find_pool_by_name("Nope").unwrap().is_none());
    }

    // ── Memberships ────────────────────────────────────────────────

    #[test]
    fn members_listed_in_join_order() {
        let store = test_store();
        let pool = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        for user in ["carol", "alice", "bob"] {
            assert!(store.add_member(&pool.id, user, MemberState::Member).unwrap());
        }

        let users: Vec<String> = store
            .list_members(&pool.id)
            .unwrap()
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        assert_eq!(users, vec!["carol", "alice", "bob"]);
        assert_eq!(store.count_members(&pool.id).unwrap(), 3);
    }

    #[test]
    fn add_existing_member_is_noop() {
        let store = test_store();
        let pool = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        assert!(store.add_member(&pool.id, "alice", MemberState::Member).unwrap());
        store.add_member(&pool.id, "bob", MemberState::Member).unwrap();
        assert!(!store.add_member(&pool.id, "alice", MemberState::Member).unwrap());

        let first = &store.list_members(&pool.id).unwrap()[0];
        assert_eq!(first.user_id, "alice");
    }

    #[test]
    fn add_member_to_missing_pool_fails() {
        let store = test_store();
        let err = store.add_member("pool-404", "alice", MemberState::Member).unwrap_err();
        assert!(matches!(err, StateError::PoolNotFound(_)));
    }

    #[test]
    fn remove_member() {
        let store = test_store();
        let pool = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        store.add_member(&pool.id, "alice", MemberState::Member).unwrap();

        assert!(store.remove_member(&pool.id, "alice").unwrap());
        assert!(!store.remove_member(&pool.id, "alice").unwrap());
        assert_eq!(store.count_members(&pool.id).unwrap(), 0);
    }

    #[test]
    fn move_member_is_atomic_and_conditional() {
        let store = test_store();
        let a = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        let b = store.create_pool("AutoGroup_2", "u1", 5, true).unwrap();
        store.add_member(&a.id, "alice", MemberState::Member).unwrap();
        store.add_member(&b.id, "bob", MemberState::Member).unwrap();

        assert!(store.move_member(&a.id, &b.id, "alice").unwrap());
        assert_eq!(store.pools_for_user("alice").unwrap(), vec![b.clone()]);
        let order: Vec<String> = store.list_members(&b.id).unwrap().into_iter().map(|m| m.user_id).collect();
        assert_eq!(order, vec!["bob", "alice"]);

        // Gone from the source: nothing is re-added.
        assert!(!store.move_member(&a.id, &b.id, "carol").unwrap());
        assert!(store.pools_for_user("carol").unwrap().is_empty());
    }

    #[test]
    fn move_member_into_missing_pool_keeps_source() {
        let store = test_store();
        let a = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        store.add_member(&a.id, "alice", MemberState::Member).unwrap();

        let err = store.move_member(&a.id, "pool-404", "alice").unwrap_err();
        assert!(matches!(err, StateError::PoolNotFound(_)));
        assert_eq!(store.count_members(&a.id).unwrap(), 1);
    }

    #[test]
    fn pools_for_user_across_pools() {
        let store = test_store();
        let a = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
        let b = store.create_pool("AutoGroup_2", "u1", 5, true).unwrap();
        store.add_member(&b.id, "alice", MemberState::Member).unwrap();
        store.add_member(&a.id, "alice", MemberState::Member).unwrap();
        store.add_member(&a.id, "bob", MemberState::Member).unwrap();

        let pools = store.pools_for_user("alice").unwrap();
        assert_eq!(pools, vec![a.clone(), b]);
        assert_eq!(store.pools_for_user("bob").unwrap(), vec![a]);
        assert!(store.pools_for_user("carol").unwrap().is_empty());
    }

    // ── Points of interest ─────────────────────────────────────────

    #[test]
    fn poi_put_and_list() {
        let store = test_store();
        store.put_poi(&test_poi(7)).unwrap();
        store.put_poi(&test_poi(3)).unwrap();

        let ids: Vec<u64> = store.list_pois().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 7]);
        assert_eq!(store.count_pois().unwrap(), 2);
    }

    #[test]
    fn poi_replace_drops_stale_entries() {
        let store = test_store();
        store.put_poi(&test_poi(1)).unwrap();
        store.put_poi(&test_poi(2)).unwrap();

        store.replace_pois(&[test_poi(2), test_poi(5)]).unwrap();

        let ids: Vec<u64> = store.list_pois().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 5]);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            let pool = store.create_pool("AutoGroup_1", "u1", 5, true).unwrap();
            store.add_member(&pool.id, "alice", MemberState::Member).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let pools = store.list_pools().unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(store.count_members(&pools[0].id).unwrap(), 1);

        // Sequences survive too, so the next pool sorts after the first.
        let next = store.create_pool("AutoGroup_2", "u2", 5, true).unwrap();
        assert!(next.seq > pools[0].seq);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = test_store();

        assert!(store.list_pools().unwrap().is_empty());
        assert!(store.list_members("any").unwrap().is_empty());
        assert!(store.list_pois().unwrap().is_empty());
        assert!(store.list_objects("locks").unwrap().is_empty());
        assert!(!store.delete_pool("nope").unwrap());
        assert!(!store.remove_member("nope", "nobody").unwrap());
        assert_eq!(store.count_pois().unwrap(), 0);
    }
}
