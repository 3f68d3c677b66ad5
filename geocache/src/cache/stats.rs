//! Cache counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by the cache as requests flow through it.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub coalesced: AtomicU64,
    pub refused: AtomicU64,
    pub fetches_scheduled: AtomicU64,
    pub fetches_succeeded: AtomicU64,
    pub fetches_failed: AtomicU64,
    pub fetches_dequeued: AtomicU64,
    pub tiles_created: AtomicU64,
    pub tiles_evicted: AtomicU64,
    pub compactions: AtomicU64,
    pub clears: AtomicU64,
}

impl CacheCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tiles: usize, entities: usize) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            requests: load(&self.requests),
            cache_hits: load(&self.cache_hits),
            coalesced: load(&self.coalesced),
            refused: load(&self.refused),
            fetches_scheduled: load(&self.fetches_scheduled),
            fetches_succeeded: load(&self.fetches_succeeded),
            fetches_failed: load(&self.fetches_failed),
            fetches_dequeued: load(&self.fetches_dequeued),
            tiles_created: load(&self.tiles_created),
            tiles_evicted: load(&self.tiles_evicted),
            compactions: load(&self.compactions),
            clears: load(&self.clears),
            tile_count: tiles,
            entity_count: entities,
        }
    }
}

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Envelope requests received (tile and bbox cells included).
    pub requests: u64,
    /// Requests answered from fresh cached data.
    pub cache_hits: u64,
    /// Requests that joined an already scheduled fetch.
    pub coalesced: u64,
    /// Requests that reached a tile just removed from the cache.
    pub refused: u64,
    /// Fetch jobs handed to the worker pool.
    pub fetches_scheduled: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    /// Jobs cancelled before they started.
    pub fetches_dequeued: u64,
    pub tiles_created: u64,
    pub tiles_evicted: u64,
    /// Compaction passes that evicted at least one tile.
    pub compactions: u64,
    pub clears: u64,
    /// Tiles currently in the query index.
    pub tile_count: usize,
    /// Entities currently in the entity index.
    pub entity_count: usize,
}

impl CacheStats {
    /// Fraction of requests answered without waiting for a fetch.
    pub fn hit_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.requests as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests ({:.1}% hits, {} coalesced), {} fetches ({} failed, {} dequeued), \
             {} tiles, {} entities",
            self.requests,
            self.hit_ratio() * 100.0,
            self.coalesced,
            self.fetches_scheduled,
            self.fetches_failed,
            self.fetches_dequeued,
            self.tile_count,
            self.entity_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            requests: 4,
            cache_hits: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }

    #[test]
    fn test_snapshot_reads_counters() {
        let counters = CacheCounters::default();
        CacheCounters::bump(&counters.requests);
        CacheCounters::bump(&counters.requests);
        CacheCounters::add(&counters.tiles_evicted, 5);

        let stats = counters.snapshot(3, 7);
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.tiles_evicted, 5);
        assert_eq!(stats.tile_count, 3);
        assert_eq!(stats.entity_count, 7);
    }

    #[test]
    fn test_display() {
        let stats = CacheStats {
            requests: 10,
            cache_hits: 5,
            fetches_scheduled: 3,
            tile_count: 2,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("10 requests"));
        assert!(text.contains("50.0% hits"));
        assert!(text.contains("2 tiles"));
    }
}
