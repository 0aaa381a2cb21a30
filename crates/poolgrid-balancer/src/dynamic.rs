//! Dynamic placement: pools are created at the tail on demand and
//! reclaimed from the tail on departure.
//!
//! Join: fill the last two pools evenly (earlier pool wins ties); when the
//! tail would overflow, open a new pool and pull up to two of the oldest
//! tail members into it.
//!
//! Leave: remove the user, then trim the tail. An empty tail is deleted, a
//! tail that fits into the pool before it is folded in, and a tail larger
//! than the pool before it shifts one member back. Only the last two pools
//! are ever inspected, regardless of the total pool count.
//!
//! A join and a leave may run at the same time. The departing user is
//! removed under the leave lock alone, but every change to the pool set
//! (backfill, merge, delete) also takes the join lock. Member moves are
//! single store transactions that skip users who already left.

use tracing::{debug, error, info, warn};

use poolgrid_core::BalancerConfig;
use poolgrid_state::{MemberState, Membership, PoolRecord};

use crate::channels::PoolChannels;
use crate::directory::{ListFilter, PoolDirectory};
use crate::error::{BalancerError, BalancerResult};
use crate::lock::{LockKey, LockManager};
use crate::outcome::*;

/// Members pulled from the full tail into a freshly created pool.
const MIGRATE_ON_SPLIT: usize = 2;

/// How often a join re-decides after its target pool vanished, and how
/// often a leave rescans after its user was moved under it.
const MAX_ATTEMPTS: usize = 3;

pub struct DynamicBalancer {
    directory: PoolDirectory,
    locks: LockManager,
    channels: PoolChannels,
    prefix: String,
    capacity: u32,
    max_pools: u32,
}

impl DynamicBalancer {
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
            capacity: config.capacity,
            max_pools: config.max_pools,
        }
    }

    pub fn directory(&self) -> &PoolDirectory {
        &self.directory
    }

    fn filter(&self) -> ListFilter {
        ListFilter {
            name_prefix: Some(self.prefix.clone()),
            open_only: true,
            limit: self.max_pools as usize,
        }
    }

    fn is_managed(&self, pool: &PoolRecord) -> bool {
        pool.open && pool.name.starts_with(&self.prefix)
    }

    // ── Join ───────────────────────────────────────────────────────

    /// Place a connecting user into a pool.
    pub async fn join(&self, user_id: &str, session_id: &str) -> BalancerResult<JoinOutcome> {
        debug!(%user_id, phase = ?JoinPhase::LockPending, "join requested");
        let Some(guard) = self.locks.acquire(LockKey::Join).await else {
            error!(%user_id, "could not acquire join lock");
            return Ok(JoinOutcome::Contended);
        };
        debug!(%user_id, phase = ?JoinPhase::Locked, "join lock held");

        let result = self.join_locked(user_id, session_id);

        guard.release();
        debug!(%user_id, phase = ?JoinPhase::Unlocked, "join finished");
        result.map(JoinOutcome::Placed)
    }

    fn join_locked(&self, user_id: &str, session_id: &str) -> BalancerResult<Placement> {
        let mut attempt = 1;
        loop {
            match self.place_once(user_id, session_id) {
                Err(BalancerError::PoolNotFound(pool_id)) if attempt < MAX_ATTEMPTS => {
                    warn!(%user_id, %pool_id, attempt, "pool vanished during placement, deciding again");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn place_once(&self, user_id: &str, session_id: &str) -> BalancerResult<Placement> {
        debug!(%user_id, phase = ?JoinPhase::Deciding, "choosing pool");
        let pools = self.directory.list(&self.filter())?;

        let Some(last) = pools.last() else {
            let pool = self.create_next(user_id)?;
            self.commit_member(&pool, user_id, session_id)?;
            return Ok(Placement {
                pool,
                created: true,
                migrated: Vec::new(),
            });
        };

        let last_members = self.directory.members_of(&last.id, Some(MemberState::Member))?;
        let m = last_members.len();
        debug!(pool = %last.name, members = m, "inspecting tail pool");

        if m + 1 > last.capacity as usize {
            if pools.len() >= self.max_pools as usize {
                let target = self.least_loaded(&pools)?;
                warn!(
                    %user_id,
                    pool = %target.name,
                    max_pools = self.max_pools,
                    "pool limit reached, placing into existing pool"
                );
                self.commit_member(&target, user_id, session_id)?;
                return Ok(Placement {
                    pool: target,
                    created: false,
                    migrated: Vec::new(),
                });
            }

            let pool = self.create_next(user_id)?;
            self.commit_member(&pool, user_id, session_id)?;
            let migrated = self.split_into(last, &pool, &last_members)?;
            return Ok(Placement {
                pool,
                created: true,
                migrated,
            });
        }

        let target = match pools.len() {
            1 => last.clone(),
            n => {
                let second = &pools[n - 2];
                let second_count = self.directory.count(&second.id)?;
                if second_count <= m {
                    second.clone()
                } else {
                    last.clone()
                }
            }
        };
        self.commit_member(&target, user_id, session_id)?;
        Ok(Placement {
            pool: target,
            created: false,
            migrated: Vec::new(),
        })
    }

    /// Create the pool numbered one past the highest existing suffix.
    fn create_next(&self, owner: &str) -> BalancerResult<PoolRecord> {
        let name = self.directory.next_pool_name(&self.prefix)?;
        Ok(self.directory.create(owner, &name, self.capacity)?)
    }

    /// Record membership, then join the pool channel (best effort).
    fn commit_member(&self, pool: &PoolRecord, user_id: &str, session_id: &str) -> BalancerResult<()> {
        debug!(%user_id, pool = %pool.name, phase = ?JoinPhase::Committing, "committing placement");
        self.directory.add_members(&pool.id, &[user_id])?;
        self.channels.join(pool, user_id, session_id);
        info!(%user_id, pool = %pool.name, "user placed");
        Ok(())
    }

    /// Move the oldest members of a full tail into the pool just created
    /// after it. The new pool already holds the joining user, so at most
    /// `capacity - 1` members are moved. Members that left in the meantime
    /// are skipped.
    fn split_into(
        &self,
        from: &PoolRecord,
        to: &PoolRecord,
        from_members: &[Membership],
    ) -> BalancerResult<Vec<String>> {
        let want = MIGRATE_ON_SPLIT.min((to.capacity as usize).saturating_sub(1));
        let mut migrated = Vec::new();
        for member in from_members {
            if migrated.len() == want {
                break;
            }
            if self.move_member(&member.user_id, from, to)? {
                migrated.push(member.user_id.clone());
            }
        }
        Ok(migrated)
    }

    fn least_loaded(&self, pools: &[PoolRecord]) -> BalancerResult<PoolRecord> {
        let mut best: Option<(usize, &PoolRecord)> = None;
        for pool in pools {
            let count = self.directory.count(&pool.id)?;
            if best.is_none_or(|(c, _)| count < c) {
                best = Some((count, pool));
            }
        }
        best.map(|(_, p)| p.clone()).ok_or(BalancerError::NoPools)
    }

    // ── Leave ──────────────────────────────────────────────────────

    /// Remove a departing user and rebalance the tail pools.
    pub async fn leave(&self, user_id: &str, session_id: &str) -> BalancerResult<LeaveOutcome> {
        let Some(guard) = self.locks.acquire(LockKey::Leave).await else {
            error!(%user_id, "could not acquire leave lock");
            return Ok(LeaveOutcome::Contended);
        };

        let Some(pool) = self.remove_user(user_id)? else {
            debug!(%user_id, "departing user not in any pool");
            return Ok(LeaveOutcome::NotMember);
        };
        self.channels.leave(&pool, user_id, session_id);
        info!(%user_id, pool = %pool.name, "user removed");

        let (backfilled, rebalance) = match self.locks.acquire(LockKey::Join).await {
            Some(join_guard) => {
                let result = self.restructure(&pool);
                join_guard.release();
                result?
            }
            None => {
                warn!(%user_id, pool = %pool.name, "join lock contended, tail left as is");
                (None, Rebalance::Skipped)
            }
        };

        guard.release();
        Ok(LeaveOutcome::Removed(Departure {
            pool,
            backfilled,
            rebalance,
        }))
    }

    /// Find the user's pool and take the user out of it.
    ///
    /// Memberships are read in one snapshot, so a user being moved by a
    /// concurrent split is always seen in exactly one pool. If the move
    /// lands between the read and the removal, the read is repeated.
    fn remove_user(&self, user_id: &str) -> BalancerResult<Option<PoolRecord>> {
        for attempt in 1..=MAX_ATTEMPTS {
            let found = self
                .directory
                .pools_of(user_id)?
                .into_iter()
                .find(|p| self.is_managed(p));
            let Some(pool) = found else {
                return Ok(None);
            };
            if self.directory.remove_members(&pool.id, &[user_id])? > 0 {
                return Ok(Some(pool));
            }
            debug!(%user_id, pool = %pool.name, attempt, "user moved before removal, looking again");
        }
        warn!(%user_id, "user kept moving, departure not recorded");
        Ok(None)
    }

    /// Backfill and tail rebalance. Runs with the join lock held, so the
    /// pool set it reads cannot change underneath it.
    fn restructure(&self, departed: &PoolRecord) -> BalancerResult<(Option<String>, Rebalance)> {
        let pools = self.directory.list(&self.filter())?;
        let backfilled = self.backfill(&pools, departed)?;
        let rebalance = self.rebalance_tail(&pools)?;
        Ok((backfilled, rebalance))
    }

    /// Refill a non-tail pool the departure left empty with the oldest
    /// tail member.
    fn backfill(&self, pools: &[PoolRecord], emptied: &PoolRecord) -> BalancerResult<Option<String>> {
        let Some(last) = pools.last() else {
            return Ok(None);
        };
        if last.id == emptied.id
            || !pools.iter().any(|p| p.id == emptied.id)
            || self.directory.count(&emptied.id)? > 0
        {
            return Ok(None);
        }
        for member in self.directory.members_of(&last.id, Some(MemberState::Member))? {
            if self.move_member(&member.user_id, last, emptied)? {
                return Ok(Some(member.user_id));
            }
        }
        Ok(None)
    }

    fn rebalance_tail(&self, pools: &[PoolRecord]) -> BalancerResult<Rebalance> {
        let Some(last) = pools.last() else {
            return Ok(Rebalance::None);
        };
        let last_members = self.directory.members_of(&last.id, Some(MemberState::Member))?;

        if last_members.is_empty() {
            self.directory.delete(&last.id)?;
            info!(pool = %last.name, "deleted empty pool");
            return Ok(Rebalance::Deleted {
                pool_id: last.id.clone(),
            });
        }

        if pools.len() < 2 {
            return Ok(Rebalance::None);
        }
        let second = &pools[pools.len() - 2];
        let second_count = self.directory.count(&second.id)?;

        if last_members.len() + second_count <= second.capacity as usize {
            let mut moved = Vec::with_capacity(last_members.len());
            for member in &last_members {
                if self.move_member(&member.user_id, last, second)? {
                    moved.push(member.user_id.clone());
                }
            }
            if self.directory.count(&last.id)? > 0 {
                warn!(pool = %last.name, "tail refilled during merge, keeping it");
            } else {
                self.directory.delete(&last.id)?;
            }
            info!(from = %last.name, into = %second.name, moved = moved.len(), "merged tail pool");
            return Ok(Rebalance::Merged {
                from: last.id.clone(),
                into: second.id.clone(),
                moved,
            });
        }

        if second_count < last_members.len() {
            for member in &last_members {
                if self.move_member(&member.user_id, last, second)? {
                    return Ok(Rebalance::Moved {
                        from: last.id.clone(),
                        into: second.id.clone(),
                        user_id: member.user_id.clone(),
                    });
                }
            }
        }

        Ok(Rebalance::None)
    }

    /// Move one user in a single store write, then notify. Returns false
    /// without notifying if the user already left `from`.
    fn move_member(&self, user_id: &str, from: &PoolRecord, to: &PoolRecord) -> BalancerResult<bool> {
        if !self.directory.move_member(&from.id, &to.id, user_id)? {
            debug!(%user_id, from = %from.name, "member already gone, not moved");
            return Ok(false);
        }
        self.channels.notify_move(user_id, from, to);
        debug!(%user_id, from = %from.name, to = %to.name, "member moved");
        Ok(true)
    }
}
