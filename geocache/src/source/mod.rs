//! Upstream data source abstraction
//!
//! The cache never talks to an upstream service directly. It is handed a
//! [`DataSource`] that knows how to answer a [`Filter`] with a list of
//! [`SpatialEntity`] records, and it drives that source from its worker pool.
//!
//! # Implementations
//!
//! - [`JsonFileSource`] - point features read from a local JSON document

mod feature;
mod filter;
mod json;

pub use feature::PointFeature;
pub use filter::QueryFilter;
pub use json::JsonFileSource;

use std::fmt;
use std::hash::Hash;

use thiserror::Error;

use crate::cache::AbortReason;
use crate::coord::Envelope;

/// A geometry-bearing record the cache can index.
///
/// Entities are immutable once fetched and are shared as `Arc<Self>`.
pub trait SpatialEntity: Send + Sync + 'static {
    /// Stable identity used to deduplicate entities reported by several tiles.
    type Key: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static;

    fn key(&self) -> Self::Key;

    /// Projected envelope of the entity's geometry.
    fn envelope(&self) -> Envelope;
}

/// Query-scoping value handed to a [`DataSource`].
///
/// The cache clones the active filter and narrows it to a tile before every
/// fetch, so a captured filter is never mutated while a fetch is running.
pub trait Filter: Clone + Send + Sync + 'static {
    /// Returns a copy of this filter restricted to `envelope`.
    fn scoped(&self, envelope: &Envelope) -> Self;
}

/// Errors returned by a data source fetch.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The upstream could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The upstream did not answer in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Local I/O failure while talking to the upstream.
    #[error("I/O error: {0}")]
    Io(String),

    /// The upstream answered with something unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Maps the error onto the abort reason delivered to waiters.
    pub fn abort_reason(&self) -> AbortReason {
        match self {
            SourceError::Connection(_) | SourceError::Timeout(_) | SourceError::Io(_) => {
                AbortReason::Connection
            }
            SourceError::InvalidResponse(_) | SourceError::Other(_) => AbortReason::Unknown,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => SourceError::Timeout(e.to_string()),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => SourceError::Connection(e.to_string()),
            _ => SourceError::Io(e.to_string()),
        }
    }
}

/// Upstream provider of spatial entities.
///
/// `fetch` is a blocking call; the cache runs it on its worker pool and never
/// on a caller's thread. The implementation is expected to enforce its own I/O
/// timeout.
pub trait DataSource: Send + Sync + 'static {
    type Entity: SpatialEntity;
    type Filter: Filter;

    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Fetches every entity matching `filter`.
    fn fetch(&self, filter: &Self::Filter) -> Result<Vec<Self::Entity>, SourceError>;
}
