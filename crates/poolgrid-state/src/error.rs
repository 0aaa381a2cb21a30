//! Store errors.
//!
//! Backend failures carry the redb stage that failed; the two domain
//! failures (taken pool name, unknown pool) get their own variants so the
//! balancer can tell them apart from I/O trouble.

use std::fmt;

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// The redb call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    Transaction,
    Table,
    Read,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Open => "open",
            Stage::Transaction => "transaction",
            Stage::Table => "table",
            Stage::Read => "read",
            Stage::Write => "write",
        })
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("store {stage} failed: {reason}")]
    Storage { stage: Stage, reason: String },

    #[error("record encoding: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("pool name taken: {0}")]
    PoolNameTaken(String),

    #[error("pool not found: {0}")]
    PoolNotFound(String),
}

impl StateError {
    pub(crate) fn storage(stage: Stage, reason: impl fmt::Display) -> Self {
        StateError::Storage {
            stage,
            reason: reason.to_string(),
        }
    }
}
