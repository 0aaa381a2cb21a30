//! Round-robin placement over a fixed set of pools.
//!
//! The pools are created once at startup. Two counters persist in the
//! `balancer` collection: the cursor (`next_pool_index`) and the current
//! per-pool capacity (`current_capacity`). A join lands in the pool under
//! the cursor while it has room; otherwise the cursor advances by one,
//! and every wrap back to the first pool raises the capacity by one.
//! Leaves only remove; pools are never merged or deleted.

use serde_json::json;
use tracing::{debug, error, info};

use poolgrid_core::BalancerConfig;
use poolgrid_state::{MemberState, Permission, PoolRecord};

use crate::channels::PoolChannels;
use crate::directory::{ListFilter, PoolDirectory};
use crate::error::{BalancerError, BalancerResult};
use crate::lock::{LockKey, LockManager};
use crate::outcome::*;

/// Collection holding the round-robin counters.
pub const COUNTER_COLLECTION: &str = "balancer";
pub const CURSOR_KEY: &str = "next_pool_index";
pub const CAPACITY_KEY: &str = "current_capacity";

/// Owner recorded on pools created by `ensure_pools`.
const SYSTEM_OWNER: &str = "system";

pub struct RoundRobinBalancer {
    directory: PoolDirectory,
    locks: LockManager,
    channels: PoolChannels,
    prefix: String,
    base_capacity: u32,
    pool_count: u32,
}

impl RoundRobinBalancer {
    pub fn new(
        directory: PoolDirectory,
        locks: LockManager,
        channels: PoolChannels,
        config: &BalancerConfig,
    ) -> Self {
        Self {
            directory,
            locks,
            channels,
            prefix: config.pool_prefix.clone(),
            base_capacity: config.capacity,
            pool_count: config.round_robin_pools,
        }
    }

    pub fn directory(&self) -> &PoolDirectory {
        &self.directory
    }

    /// Create `{prefix}_1 ..= {prefix}_{n}` where missing. Returns how many
    /// pools were created.
    pub fn ensure_pools(&self) -> BalancerResult<usize> {
        let mut created = 0;
        for n in 1..=self.pool_count as usize {
            let name = PoolDirectory::pool_name(&self.prefix, n);
            if self.directory.find(&name)?.is_none() {
                self.directory.create(SYSTEM_OWNER, &name, self.base_capacity)?;
                created += 1;
            }
        }
        if created > 0 {
            info!(created, total = self.pool_count, "round-robin pools ready");
        }
        Ok(created)
    }

    fn pools(&self) -> BalancerResult<Vec<PoolRecord>> {
        let pools = self.directory.list(&ListFilter {
            name_prefix: Some(self.prefix.clone()),
            open_only: true,
            limit: self.pool_count as usize,
        })?;
        if pools.is_empty() {
            return Err(BalancerError::NoPools);
        }
        Ok(pools)
    }

    fn counter(&self, key: &str, default: u64) -> BalancerResult<u64> {
        let value = self
            .directory
            .store()
            .get_object(COUNTER_COLLECTION, key)?
            .and_then(|obj| obj.value.as_u64());
        Ok(value.unwrap_or(default))
    }

    fn set_counter(&self, key: &str, value: u64) -> BalancerResult<()> {
        self.directory.store().put_object(
            COUNTER_COLLECTION,
            key,
            json!(value),
            Permission::None,
            Permission::None,
        )?;
        Ok(())
    }

    /// Current (cursor, capacity) pair.
    pub fn counters(&self) -> BalancerResult<(u64, u64)> {
        Ok((
            self.counter(CURSOR_KEY, 0)?,
            self.counter(CAPACITY_KEY, u64::from(self.base_capacity))?,
        ))
    }

    pub async fn join(&self, user_id: &str, session_id: &str) -> BalancerResult<JoinOutcome> {
        let Some(guard) = self.locks.acquire(LockKey::Join).await else {
            error!(%user_id, "could not acquire join lock");
            return Ok(JoinOutcome::Contended);
        };

        let result = self.join_locked(user_id, session_id);

        guard.release();
        result.map(JoinOutcome::Placed)
    }

    fn join_locked(&self, user_id: &str, session_id: &str) -> BalancerResult<Placement> {
        let pools = self.pools()?;
        let (cursor, capacity) = self.counters()?;
        let mut index = cursor as usize % pools.len();

        let occupancy = self.directory.count(&pools[index].id)? as u64;
        if occupancy >= capacity {
            index = (index + 1) % pools.len();
            let capacity = if index == 0 { capacity + 1 } else { capacity };
            self.set_counter(CURSOR_KEY, index as u64)?;
            self.set_counter(CAPACITY_KEY, capacity)?;
            debug!(cursor = index, capacity, "round-robin cursor advanced");
        }

        let pool = pools[index].clone();
        self.directory.add_members(&pool.id, &[user_id])?;
        self.channels.join(&pool, user_id, session_id);
        info!(%user_id, pool = %pool.name, "user placed");
        Ok(Placement {
            pool,
            created: false,
            migrated: Vec::new(),
        })
    }

    pub async fn leave(&self, user_id: &str, session_id: &str) -> BalancerResult<LeaveOutcome> {
        let Some(guard) = self.locks.acquire(LockKey::Leave).await else {
            error!(%user_id, "could not acquire leave lock");
            return Ok(LeaveOutcome::Contended);
        };

        let result = self.leave_locked(user_id, session_id);

        guard.release();
        result
    }

    fn leave_locked(&self, user_id: &str, session_id: &str) -> BalancerResult<LeaveOutcome> {
        for pool in self.pools()? {
            let members = self.directory.members_of(&pool.id, Some(MemberState::Member))?;
            if members.iter().any(|m| m.user_id == user_id) {
                self.directory.remove_members(&pool.id, &[user_id])?;
                self.channels.leave(&pool, user_id, session_id);
                info!(%user_id, pool = %pool.name, "user removed");
                return Ok(LeaveOutcome::Removed(Departure {
                    pool,
                    backfilled: None,
                    rebalance: Rebalance::None,
                }));
            }
        }
        Ok(LeaveOutcome::NotMember)
    }
}
