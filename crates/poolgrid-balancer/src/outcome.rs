//! What a join or leave did.

use serde::Serialize;

use poolgrid_state::PoolRecord;

/// Steps of a single join, in order. Logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    LockPending,
    Locked,
    Deciding,
    Committing,
    Unlocked,
}

/// Result of a join attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Placed(Placement),
    /// The join lock could not be taken; nothing was changed.
    Contended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub pool: PoolRecord,
    /// The pool was created for this join.
    pub created: bool,
    /// Users moved from the previous tail pool into the new one.
    pub migrated: Vec<String>,
}

/// Result of a leave attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    Removed(Departure),
    /// The user was not in any pool.
    NotMember,
    /// The leave lock could not be taken; nothing was changed.
    Contended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    /// The pool the user was removed from.
    pub pool: PoolRecord,
    /// Tail member moved in because the departure emptied a non-tail pool.
    pub backfilled: Option<String>,
    pub rebalance: Rebalance,
}

/// Tail rebalancing performed after a departure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Rebalance {
    None,
    /// The join lock could not be taken, so the tail was left as is.
    Skipped,
    /// The tail pool was empty and got deleted.
    Deleted { pool_id: String },
    /// The tail pool fit into the one before it and got folded in.
    Merged {
        from: String,
        into: String,
        moved: Vec<String>,
    },
    /// One member moved from the tail to the pool before it.
    Moved {
        from: String,
        into: String,
        user_id: String,
    },
}

impl JoinOutcome {
    pub fn pool(&self) -> Option<&PoolRecord> {
        match self {
            JoinOutcome::Placed(p) => Some(&p.pool),
            JoinOutcome::Contended => None,
        }
    }
}
