//! poolgrid-balancer — capacity-bounded pool placement.
//!
//! Decides which pool a connecting user joins and cleans up after a
//! departing one. Two policies are available behind [`Balancer`]:
//!
//! - **Dynamic** (`dynamic`): pools are created at the tail as the newest
//!   one fills, with a small migration of its oldest members; departures
//!   merge or delete tail pools.
//! - **Round-robin** (`round_robin`): a fixed pool set with a persisted
//!   cursor and a capacity that grows on every full cycle.
//!
//! Joins and leaves are serialized per kind by advisory locks in the
//! shared store (`lock`). The balancer holds no membership state of its
//! own; every decision re-reads the pool directory.

pub mod channels;
pub mod directory;
pub mod dynamic;
pub mod error;
pub mod lock;
pub mod outcome;
pub mod round_robin;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::info;

use poolgrid_core::{BalancerMode, ChannelTransport, Notifier, PoolgridConfig};
use poolgrid_state::StateStore;

pub use channels::PoolChannels;
pub use directory::{ListFilter, PoolDirectory};
pub use dynamic::DynamicBalancer;
pub use error::{BalancerError, BalancerResult};
pub use lock::{LockGuard, LockKey, LockManager};
pub use outcome::{Departure, JoinOutcome, JoinPhase, LeaveOutcome, Placement, Rebalance};
pub use round_robin::RoundRobinBalancer;

/// The configured placement policy.
pub enum Balancer {
    Dynamic(DynamicBalancer),
    RoundRobin(RoundRobinBalancer),
}

impl Balancer {
    /// Build the policy selected by `balancer.mode`. Round-robin pools are
    /// created here if missing.
    pub fn from_config(
        config: &PoolgridConfig,
        store: StateStore,
        transport: Arc<dyn ChannelTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> BalancerResult<Self> {
        let directory = PoolDirectory::new(store.clone());
        let locks = LockManager::new(store, &config.lock);
        let channels = PoolChannels::new(transport, notifier);

        let balancer = match config.balancer.mode {
            BalancerMode::Dynamic => Balancer::Dynamic(DynamicBalancer::new(
                directory,
                locks,
                channels,
                &config.balancer,
            )),
            BalancerMode::RoundRobin => {
                let rr = RoundRobinBalancer::new(directory, locks, channels, &config.balancer);
                rr.ensure_pools()?;
                Balancer::RoundRobin(rr)
            }
        };
        info!(mode = ?config.balancer.mode, prefix = %config.balancer.pool_prefix, "balancer ready");
        Ok(balancer)
    }

    pub fn mode(&self) -> BalancerMode {
        match self {
            Balancer::Dynamic(_) => BalancerMode::Dynamic,
            Balancer::RoundRobin(_) => BalancerMode::RoundRobin,
        }
    }

    /// Place a connecting user into a pool.
    pub async fn place(&self, user_id: &str, session_id: &str) -> BalancerResult<JoinOutcome> {
        match self {
            Balancer::Dynamic(b) => b.join(user_id, session_id).await,
            Balancer::RoundRobin(b) => b.join(user_id, session_id).await,
        }
    }

    /// Remove a departing user from its pool.
    pub async fn remove(&self, user_id: &str, session_id: &str) -> BalancerResult<LeaveOutcome> {
        match self {
            Balancer::Dynamic(b) => b.leave(user_id, session_id).await,
            Balancer::RoundRobin(b) => b.leave(user_id, session_id).await,
        }
    }

    pub fn directory(&self) -> &PoolDirectory {
        match self {
            Balancer::Dynamic(b) => b.directory(),
            Balancer::RoundRobin(b) => b.directory(),
        }
    }
}
