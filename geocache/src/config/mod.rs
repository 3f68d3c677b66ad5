//! Cache configuration.
//!
//! [`CacheConfig`] holds the tuning knobs of a [`DataCache`](crate::cache::DataCache).
//! [`ConfigFile`] loads them, together with logging settings, from an INI file.

mod file;

pub use file::{default_config_path, ConfigFile, LoggingConfig, DEFAULT_LOG_FILE_NAME};

use std::time::Duration;

use thiserror::Error;

use crate::coord::MAX_ZOOM;

/// Default canonical zoom level for bounding-box decomposition.
pub const DEFAULT_ZOOM: u8 = 14;

/// Default number of tiles compaction shrinks the query index towards.
pub const DEFAULT_TARGET_TILES: usize = 50;

/// Default maximum number of tiles evicted per compaction pass.
pub const DEFAULT_EVICT_BATCH: usize = 20;

/// Default number of requests between compaction checks.
pub const DEFAULT_COMPACTION_INTERVAL: u64 = 10;

/// Default reload interval for cached data.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(300);

/// Reload intervals shorter than this are raised to it.
pub const MIN_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Tuning parameters of a data cache.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// Zoom level bounding boxes are decomposed at.
    pub zoom: u8,

    /// Tile count compaction evicts down to. The high-water mark is twice this.
    pub target_tiles: usize,

    /// Maximum tiles evicted per compaction pass.
    pub evict_batch: usize,

    /// Compaction is checked after every `compaction_interval` requests.
    pub compaction_interval: u64,

    /// Age after which cached data is refetched. Zero disables expiry.
    pub reload_interval: Duration,

    /// Worker pool size used when the cache builds its own pool.
    pub workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            target_tiles: DEFAULT_TARGET_TILES,
            evict_batch: DEFAULT_EVICT_BATCH,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            workers: crate::executor::DEFAULT_WORKERS,
        }
    }
}

impl CacheConfig {
    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_target_tiles(mut self, target_tiles: usize) -> Self {
        self.target_tiles = target_tiles;
        self
    }

    pub fn with_evict_batch(mut self, evict_batch: usize) -> Self {
        self.evict_batch = evict_batch;
        self
    }

    pub fn with_compaction_interval(mut self, interval: u64) -> Self {
        self.compaction_interval = interval;
        self
    }

    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Tile count above which compaction starts evicting.
    pub fn high_water_mark(&self) -> usize {
        self.target_tiles.saturating_mul(2)
    }

    /// Effective reload interval.
    ///
    /// `None` means cached data never expires. Configured values below
    /// [`MIN_RELOAD_INTERVAL`] are raised to it.
    pub fn min_reload_interval(&self) -> Option<Duration> {
        if self.reload_interval.is_zero() {
            None
        } else {
            Some(self.reload_interval.max(MIN_RELOAD_INTERVAL))
        }
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zoom > MAX_ZOOM {
            return Err(ConfigError::invalid("cache.zoom", self.zoom, "max 22"));
        }
        if self.target_tiles == 0 {
            return Err(ConfigError::invalid("cache.target_tiles", 0, "must be positive"));
        }
        if self.evict_batch == 0 {
            return Err(ConfigError::invalid("cache.evict_batch", 0, "must be positive"));
        }
        if self.compaction_interval == 0 {
            return Err(ConfigError::invalid(
                "cache.compaction_interval",
                0,
                "must be positive",
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("cache.workers", 0, "must be positive"));
        }
        Ok(())
    }
}
