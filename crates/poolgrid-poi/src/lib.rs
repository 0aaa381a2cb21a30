//! poolgrid-poi — points of interest for poolgrid clients.
//!
//! A content system (WordPress) publishes points of interest; this crate
//! fetches them, keeps a copy in the state store, refreshes it in the
//! background, and accepts pushed single-record updates. Clients only
//! ever read the stored copy.

pub mod cache;
pub mod error;
pub mod source;

pub use cache::PoiCache;
pub use error::{PoiError, PoiResult};
pub use source::{BoxFuture, PoiSource, WordPressSource, wait_ready};
