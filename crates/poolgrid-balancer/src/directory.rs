//! Pool directory — the single authority on pools and their members.
//!
//! Thin layer over the state store that applies the pool naming
//! convention and list filters. Nothing here is cached: every call reads
//! the store, so callers always see the latest committed membership.

use tracing::{debug, info};

use poolgrid_state::{MemberState, Membership, PoolRecord, StateResult, StateStore};

/// Which pools `list` returns.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Only pools whose name starts with this prefix.
    pub name_prefix: Option<String>,
    /// Only pools that accept members without approval.
    pub open_only: bool,
    /// Upper bound on returned pools (0 = unbounded).
    pub limit: usize,
}

#[derive(Clone)]
pub struct PoolDirectory {
    store: StateStore,
}

impl PoolDirectory {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Display name of the `n`-th pool (1-based): `{prefix}_{n}`.
    pub fn pool_name(prefix: &str, n: usize) -> String {
        format!("{prefix}_{n}")
    }

    /// Name for the next pool under `prefix`: one past the highest numeric
    /// suffix in use, so a gap left by a deleted pool is never reused.
    pub fn next_pool_name(&self, prefix: &str) -> StateResult<String> {
        let stem = format!("{prefix}_");
        let highest = self
            .store
            .list_pools()?
            .iter()
            .filter_map(|p| p.name.strip_prefix(&stem)?.parse::<usize>().ok())
            .max()
            .unwrap_or(0);
        Ok(Self::pool_name(prefix, highest + 1))
    }

    /// Pools matching the filter, oldest first.
    pub fn list(&self, filter: &ListFilter) -> StateResult<Vec<PoolRecord>> {
        let mut pools: Vec<PoolRecord> = self
            .store
            .list_pools()?
            .into_iter()
            .filter(|p| {
                filter
                    .name_prefix
                    .as_deref()
                    .is_none_or(|prefix| p.name.starts_with(prefix))
            })
            .filter(|p| !filter.open_only || p.open)
            .collect();
        if filter.limit > 0 {
            pools.truncate(filter.limit);
        }
        debug!(count = pools.len(), "pools listed");
        Ok(pools)
    }

    /// Create an open pool. Fails if the name is already taken.
    pub fn create(&self, owner: &str, name: &str, capacity: u32) -> StateResult<PoolRecord> {
        let pool = self.store.create_pool(name, owner, capacity, true)?;
        info!(pool_id = %pool.id, name = %pool.name, capacity, "created pool");
        Ok(pool)
    }

    pub fn find(&self, name: &str) -> StateResult<Option<PoolRecord>> {
        self.store.find_pool_by_name(name)
    }

    /// Members of a pool in join order, optionally restricted to one state.
    pub fn members_of(
        &self,
        pool_id: &str,
        state: Option<MemberState>,
    ) -> StateResult<Vec<Membership>> {
        let members = self.store.list_members(pool_id)?;
        Ok(match state {
            Some(state) => members.into_iter().filter(|m| m.state == state).collect(),
            None => members,
        })
    }

    /// Number of regular members in a pool.
    pub fn count(&self, pool_id: &str) -> StateResult<usize> {
        Ok(self.members_of(pool_id, Some(MemberState::Member))?.len())
    }

    /// Add users as regular members. Returns how many were newly added.
    pub fn add_members(&self, pool_id: &str, users: &[&str]) -> StateResult<usize> {
        let mut added = 0;
        for user in users {
            if self.store.add_member(pool_id, user, MemberState::Member)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Remove users from a pool. Returns how many were members.
    pub fn remove_members(&self, pool_id: &str, users: &[&str]) -> StateResult<usize> {
        let mut removed = 0;
        for user in users {
            if self.store.remove_member(pool_id, user)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Move one user between pools atomically. Returns false if the user
    /// had already left `from`.
    pub fn move_member(&self, from: &str, to: &str, user_id: &str) -> StateResult<bool> {
        self.store.move_member(from, to, user_id)
    }

    /// Delete a pool. Only called on pools observed to be empty.
    pub fn delete(&self, pool_id: &str) -> StateResult<bool> {
        let existed = self.store.delete_pool(pool_id)?;
        if existed {
            info!(%pool_id, "deleted pool");
        }
        Ok(existed)
    }

    /// Every pool the user belongs to, oldest first.
    pub fn pools_of(&self, user_id: &str) -> StateResult<Vec<PoolRecord>> {
        self.store.pools_for_user(user_id)
    }
}
