//! POI error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoiError {
    #[error("invalid source url: {0}")]
    InvalidUrl(String),

    #[error("http request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("source did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("state store error: {0}")]
    State(#[from] poolgrid_state::StateError),
}

pub type PoiResult<T> = Result<T, PoiError>;
