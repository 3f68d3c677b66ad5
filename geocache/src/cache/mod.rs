//! Tile-based spatial data cache.
//!
//! A [`DataCache`] turns envelope and bounding-box queries into a bounded set
//! of fetches against a [`DataSource`]. Cached regions are tracked as
//! [`DataTile`]s in a query index; fetched entities live in a separate entity
//! index and are shared as `Arc<E>`.
//!
//! # Request Flow
//!
//! ```text
//! get_data_by_envelope
//!        │
//!        ▼
//!  containing tile? ──no──► create tile for the envelope
//!        │ yes                      │
//!        ▼                          ▼
//!    DataTile::await_data ◄─────────┘
//!        │
//!        ├── fresh ──────► on_data (entity index, caller's thread)
//!        ├── job running ─► join as waiter
//!        └── stale/empty ─► schedule fetch on the worker pool
//!                                 │
//!                                 ▼
//!                  replace entities, resolve every waiter
//! ```
//!
//! Every entry point returns a handle immediately and never blocks on the
//! data source.
//!
//! # Example
//!
//! ```ignore
//! use geocache::cache::{tile_callback, DataCache};
//! use geocache::config::CacheConfig;
//! use geocache::executor::WorkerPool;
//! use geocache::source::{JsonFileSource, QueryFilter};
//!
//! let pool = WorkerPool::from_current(4)?;
//! let cache = DataCache::new(
//!     JsonFileSource::new("features.json"),
//!     QueryFilter::default(),
//!     CacheConfig::default(),
//!     pool,
//! )?;
//!
//! let handle = cache.get_data_by_tile(
//!     &Tile::new(8185, 5447, 14),
//!     tile_callback(|data| println!("{} features", data.len()), |_| {}),
//!     false,
//! );
//! ```

mod callback;
mod stats;
mod store;
mod tile;

pub use callback::{tile_callback, AbortReason, FnTileCallback, TileCallback, TileRequestHandle};
pub use stats::CacheStats;
pub use tile::{DataTile, TileStatus};

use std::sync::Arc;

use crate::config::{CacheConfig, ConfigError};
use crate::coord::{Envelope, GeoBounds, Tile};
use crate::coordinator::{BBoxCallback, BBoxRequest, BBoxRequestHandle};
use crate::executor::WorkerPool;
use crate::source::DataSource;
use store::CacheInner;

/// Spatial data cache over one data source.
///
/// Cloning is cheap; clones share the same indexes, filter and worker pool.
pub struct DataCache<S: DataSource> {
    inner: Arc<CacheInner<S>>,
}

impl<S: DataSource> Clone for DataCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DataSource> DataCache<S> {
    /// Creates a cache.
    ///
    /// # Arguments
    ///
    /// * `source` - Upstream the cache fetches from
    /// * `filter` - Initial query filter
    /// * `config` - Tuning parameters, validated here
    /// * `pool` - Worker pool fetch jobs run on; may be shared between caches
    pub fn new(
        source: S,
        filter: S::Filter,
        config: CacheConfig,
        pool: WorkerPool,
    ) -> Result<Self, ConfigError> {
        Self::with_shared_source(Arc::new(source), filter, config, pool)
    }

    /// Creates a cache over a source that is also used elsewhere.
    pub fn with_shared_source(
        source: Arc<S>,
        filter: S::Filter,
        config: CacheConfig,
        pool: WorkerPool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(
            source = source.name(),
            zoom = config.zoom,
            target_tiles = config.target_tiles,
            workers = pool.size(),
            "Created data cache"
        );
        Ok(Self {
            inner: CacheInner::new(source, filter, config, pool),
        })
    }

    /// Requests the entities of one grid tile.
    ///
    /// A tile outside the supported grid is answered with
    /// [`AbortReason::Unknown`] before this returns.
    pub fn get_data_by_tile(
        &self,
        tile: &Tile,
        callback: Arc<dyn TileCallback<S::Entity>>,
        force_update: bool,
    ) -> TileRequestHandle<S::Entity> {
        if let Err(e) = tile.validate() {
            tracing::warn!(tile = %tile, error = %e, "Rejected tile request");
            return self.inner.reject(callback, AbortReason::Unknown);
        }
        self.inner
            .get_data_by_envelope(tile.envelope(), callback, force_update)
    }

    /// Requests the entities intersecting `envelope`.
    ///
    /// Served by the smallest existing tile containing the envelope, or by a
    /// new tile created for exactly this envelope.
    pub fn get_data_by_envelope(
        &self,
        envelope: Envelope,
        callback: Arc<dyn TileCallback<S::Entity>>,
        force_update: bool,
    ) -> TileRequestHandle<S::Entity> {
        self.inner
            .get_data_by_envelope(envelope, callback, force_update)
    }

    /// Requests the entities of a geographic bounding box.
    ///
    /// The box is split into tiles at the configured zoom. The callback gets
    /// progress per tile and one deduplicated result once every tile resolved.
    pub fn get_data_by_bbox(
        &self,
        bounds: GeoBounds,
        callback: Arc<dyn BBoxCallback<S::Entity>>,
        force_update: bool,
    ) -> BBoxRequestHandle<S::Entity> {
        BBoxRequest::start(self, bounds, callback, force_update)
    }

    /// Replaces the active filter and clears the cache.
    pub fn set_filter(&self, filter: S::Filter) {
        self.inner.replace_filter(filter);
        self.inner.clear_cache();
    }

    pub fn filter(&self) -> S::Filter {
        self.inner.filter()
    }

    /// Cancels every pending request and drops all cached data.
    pub fn clear_cache(&self) {
        self.inner.clear_cache();
    }

    /// Runs a compaction pass now, keeping tiles with pending requests.
    ///
    /// Returns the number of evicted tiles.
    pub fn compact(&self) -> usize {
        self.inner.compact()
    }

    /// Status of the tile that would serve `envelope`, if one exists.
    pub fn tile_status(&self, envelope: &Envelope) -> Option<TileStatus> {
        self.inner.tile_status(envelope)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// Number of tiles in the query index.
    pub fn tile_count(&self) -> usize {
        self.inner.tile_count()
    }

    /// Number of entities in the entity index.
    pub fn entity_count(&self) -> usize {
        self.inner.entity_count()
    }

    pub fn config(&self) -> &CacheConfig {
        self.inner.config()
    }

    /// Zoom level bounding boxes are decomposed at.
    pub fn zoom(&self) -> u8 {
        self.inner.config().zoom
    }

    pub fn source(&self) -> &S {
        self.inner.source().as_ref()
    }

    pub fn pool(&self) -> &WorkerPool {
        self.inner.pool()
    }
}

impl<S: DataSource> std::fmt::Debug for DataCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCache")
            .field("source", &self.inner.source().name())
            .field("tiles", &self.tile_count())
            .field("entities", &self.entity_count())
            .finish()
    }
}
