//! GeoCache - tile-based spatial data cache
//!
//! This library turns geographic bounding-box queries into a bounded set of
//! fetches against a slow upstream data source. Cached regions and fetched
//! entities are indexed spatially, concurrent requests for the same region
//! share one fetch, and a bounding-box query is answered once with the
//! deduplicated results of every tile it covers.
//!
//! # Modules
//!
//! - [`coord`]: Web Mercator projection and the tile grid
//! - [`index`]: quadtree spatial index
//! - [`source`]: data source, filter and entity traits, plus a JSON file source
//! - [`cache`]: the tile cache and per-tile request handling
//! - [`coordinator`]: bounding-box decomposition and aggregation
//! - [`executor`]: worker pool fetch jobs run on
//! - [`config`]: cache and logging configuration
//! - [`logging`]: tracing subscriber setup

pub mod cache;
pub mod config;
pub mod coord;
pub mod coordinator;
pub mod executor;
pub mod index;
pub mod logging;
pub mod source;

pub use cache::{AbortReason, CacheStats, DataCache, TileCallback, TileRequestHandle};
pub use coordinator::{BBoxCallback, BBoxRequestHandle};
