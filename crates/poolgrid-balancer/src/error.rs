//! Balancer error types.

use thiserror::Error;

use poolgrid_state::StateError;

/// Errors that can occur during placement and departure.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// A pool chosen for placement vanished before the write landed.
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("no pools configured for round-robin placement")]
    NoPools,

    #[error("state store error: {0}")]
    State(StateError),
}

impl From<StateError> for BalancerError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::PoolNotFound(id) => BalancerError::PoolNotFound(id),
            other => BalancerError::State(other),
        }
    }
}

pub type BalancerResult<T> = Result<T, BalancerError>;
