//! Cache engine shared by every [`DataCache`](super::DataCache) handle.
//!
//! # Lock Ordering
//!
//! The query index and the entity index each sit behind their own mutex and
//! are never locked together. Tile locks are leaves: they may be taken while
//! an index lock is held, never the other way round. No lock is held while a
//! caller callback runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::callback::{AbortReason, TileCallback, TileRequestHandle};
use super::stats::{CacheCounters, CacheStats};
use super::tile::{AwaitOutcome, DataTile, FetchTicket, TileBackend, TileStatus};
use crate::config::CacheConfig;
use crate::coord::Envelope;
use crate::executor::WorkerPool;
use crate::index::SpatialIndex;
use crate::source::{DataSource, Filter, SpatialEntity};

type Entity<S> = <S as DataSource>::Entity;

pub(crate) struct CacheInner<S: DataSource> {
    self_ref: Weak<Self>,
    source: Arc<S>,
    config: CacheConfig,
    reload_interval: Option<Duration>,
    pool: WorkerPool,
    filter: RwLock<S::Filter>,
    query_index: Mutex<SpatialIndex<DataTile<Entity<S>>>>,
    entity_index: Mutex<SpatialIndex<Entity<S>>>,
    /// Bumped on every clear; fetches started in an older epoch do not write.
    epoch: AtomicU64,
    access_clock: AtomicU64,
    tile_seq: AtomicU64,
    request_counter: AtomicU64,
    counters: CacheCounters,
}

impl<S: DataSource> CacheInner<S> {
    pub fn new(
        source: Arc<S>,
        filter: S::Filter,
        config: CacheConfig,
        pool: WorkerPool,
    ) -> Arc<Self> {
        let reload_interval = config.min_reload_interval();
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            source,
            config,
            reload_interval,
            pool,
            filter: RwLock::new(filter),
            query_index: Mutex::new(SpatialIndex::new()),
            entity_index: Mutex::new(SpatialIndex::new()),
            epoch: AtomicU64::new(0),
            access_clock: AtomicU64::new(0),
            tile_seq: AtomicU64::new(0),
            request_counter: AtomicU64::new(0),
            counters: CacheCounters::default(),
        })
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn filter(&self) -> S::Filter {
        self.filter.read().clone()
    }

    pub fn replace_filter(&self, filter: S::Filter) {
        *self.filter.write() = filter;
    }

    pub fn tile_count(&self) -> usize {
        self.query_index.lock().len()
    }

    pub fn entity_count(&self) -> usize {
        self.entity_index.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        let tiles = self.tile_count();
        let entities = self.entity_count();
        self.counters.snapshot(tiles, entities)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    pub fn get_data_by_envelope(
        &self,
        envelope: Envelope,
        callback: Arc<dyn TileCallback<Entity<S>>>,
        force_update: bool,
    ) -> TileRequestHandle<Entity<S>> {
        CacheCounters::bump(&self.counters.requests);

        // A tile evicted between lookup and registration is looked up again;
        // one removed by a clear cancels the request.
        let epoch = self.epoch.load(Ordering::SeqCst);
        let (tile, handle, outcome) = loop {
            let tile = self.find_or_create_tile(&envelope);
            let (handle, outcome) =
                tile.await_data(self, envelope, Arc::clone(&callback), force_update);
            if outcome != AwaitOutcome::Refused {
                break (tile, handle, outcome);
            }
            if self.epoch.load(Ordering::SeqCst) != epoch {
                callback.on_abort(AbortReason::Canceled);
                break (tile, handle, outcome);
            }
            debug!(tile = %tile.envelope(), "Tile evicted before registration, retrying");
        };

        let counter = match outcome {
            AwaitOutcome::Hit => &self.counters.cache_hits,
            AwaitOutcome::Joined => &self.counters.coalesced,
            AwaitOutcome::Scheduled => &self.counters.fetches_scheduled,
            AwaitOutcome::Refused => &self.counters.refused,
        };
        CacheCounters::bump(counter);
        debug!(
            envelope = %envelope,
            tile = %tile.envelope(),
            outcome = ?outcome,
            force_update,
            "Envelope request"
        );

        self.maybe_compact();
        handle
    }

    /// Answers a request that cannot be served by any tile.
    pub fn reject(
        &self,
        callback: Arc<dyn TileCallback<Entity<S>>>,
        reason: AbortReason,
    ) -> TileRequestHandle<Entity<S>> {
        CacheCounters::bump(&self.counters.requests);
        CacheCounters::bump(&self.counters.refused);
        callback.on_abort(reason);
        TileRequestHandle::resolved()
    }

    /// Status of the tile that would serve `envelope`, if one exists.
    pub fn tile_status(&self, envelope: &Envelope) -> Option<TileStatus> {
        let index = self.query_index.lock();
        Self::best_containing(&index, envelope).map(|tile| tile.status())
    }

    /// Smallest tile containing `envelope`, oldest first among equals.
    fn best_containing(
        index: &SpatialIndex<DataTile<Entity<S>>>,
        envelope: &Envelope,
    ) -> Option<Arc<DataTile<Entity<S>>>> {
        index
            .query(envelope)
            .into_iter()
            .filter(|tile| tile.envelope().contains(envelope))
            .min_by(|a, b| {
                a.envelope()
                    .area()
                    .total_cmp(&b.envelope().area())
                    .then(a.seq().cmp(&b.seq()))
            })
    }

    fn find_or_create_tile(&self, envelope: &Envelope) -> Arc<DataTile<Entity<S>>> {
        let mut index = self.query_index.lock();
        if let Some(tile) = Self::best_containing(&index, envelope) {
            return tile;
        }

        let seq = self.tile_seq.fetch_add(1, Ordering::Relaxed);
        let tile = Arc::new(DataTile::new(*envelope, seq, self.reload_interval));
        tile.touch(self.next_access());
        index.insert(*envelope, Arc::clone(&tile));
        CacheCounters::bump(&self.counters.tiles_created);
        tile
    }

    // =========================================================================
    // Fetch jobs
    // =========================================================================

    async fn run_fetch(
        self: Arc<Self>,
        tile: Arc<DataTile<Entity<S>>>,
        ticket: FetchTicket,
        filter: S::Filter,
        epoch: u64,
    ) {
        let permit = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => None,
            permit = self.pool.acquire() => permit,
        };
        let Some(_permit) = permit else {
            CacheCounters::bump(&self.counters.fetches_dequeued);
            debug!(tile = %tile.envelope(), job = ticket.job_id, "Fetch dequeued before start");
            return;
        };

        if !tile.begin_job(ticket.job_id) {
            CacheCounters::bump(&self.counters.fetches_dequeued);
            debug!(tile = %tile.envelope(), job = ticket.job_id, "Fetch dequeued before start");
            return;
        }

        let started = Instant::now();
        let source = Arc::clone(&self.source);
        let result = self
            .pool
            .spawn_blocking(move || source.fetch(&filter))
            .await;

        let outcome = match result {
            Ok(Ok(entities)) => {
                CacheCounters::bump(&self.counters.fetches_succeeded);
                let stored = self.store_entities(&tile, entities, epoch);
                debug!(
                    tile = %tile.envelope(),
                    entities = stored.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fetch completed"
                );
                Ok(stored)
            }
            Ok(Err(e)) => {
                CacheCounters::bump(&self.counters.fetches_failed);
                warn!(
                    tile = %tile.envelope(),
                    source = self.source.name(),
                    error = %e,
                    "Fetch failed"
                );
                Err(e.abort_reason())
            }
            Err(e) => {
                CacheCounters::bump(&self.counters.fetches_failed);
                warn!(
                    tile = %tile.envelope(),
                    source = self.source.name(),
                    error = %e,
                    "Fetch task panicked"
                );
                Err(AbortReason::Unknown)
            }
        };

        tile.complete_job(ticket.job_id, outcome);
    }

    /// Replaces the tile's region of the entity index with a fetch result.
    ///
    /// Returns the stored entities. Nothing is written if the cache was
    /// cleared or the tile was evicted while the fetch ran.
    fn store_entities(
        &self,
        tile: &DataTile<Entity<S>>,
        entities: Vec<Entity<S>>,
        epoch: u64,
    ) -> Vec<Arc<Entity<S>>> {
        let envelope = *tile.envelope();
        let fresh: Vec<Arc<Entity<S>>> = entities
            .into_iter()
            .map(Arc::new)
            .filter(|e| e.envelope().intersects(&envelope))
            .collect();

        let mut index = self.entity_index.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch || tile.is_detached() {
            debug!(tile = %envelope, "Discarding fetch result for removed tile");
            return fresh;
        }

        for (old_envelope, old) in index.query_entries(&envelope) {
            index.remove(&old_envelope, &old);
        }
        for entity in &fresh {
            index.insert(entity.envelope(), Arc::clone(entity));
        }
        fresh
    }

    // =========================================================================
    // Eviction and clearing
    // =========================================================================

    fn maybe_compact(&self) {
        let interval = self.config.compaction_interval.max(1);
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % interval == 0 {
            self.compact();
        }
    }

    /// Evicts least-recently-used idle tiles once the high-water mark is
    /// exceeded.
    ///
    /// Tiles with waiters or a fetch job are skipped, so an eviction never
    /// cancels a request. Returns the number of tiles evicted. Never shrinks
    /// below the target.
    pub fn compact(&self) -> usize {
        let target = self.config.target_tiles;
        let (victims, survivors, busy) = {
            let mut index = self.query_index.lock();
            let len = index.len();
            if len <= self.config.high_water_mark() {
                return 0;
            }

            let quota = self.config.evict_batch.min(len - target);
            let mut candidates = index.query_all();
            candidates.sort_by_key(|tile| (tile.last_used(), tile.seq()));

            let mut victims = Vec::with_capacity(quota);
            let mut busy = 0;
            for tile in candidates {
                if victims.len() == quota {
                    break;
                }
                if tile.detach_if_idle() {
                    index.remove(tile.envelope(), &tile);
                    victims.push(tile);
                } else {
                    busy += 1;
                }
            }

            // Remaining tiles still covering part of an evicted region
            let survivors: Vec<Envelope> = victims
                .iter()
                .flat_map(|victim| index.query(victim.envelope()))
                .map(|tile| *tile.envelope())
                .collect();
            (victims, survivors, busy)
        };

        CacheCounters::bump(&self.counters.compactions);
        if victims.is_empty() {
            debug!(skipped_busy = busy, "No idle tiles to evict");
            return 0;
        }

        let mut removed = 0;
        {
            let mut index = self.entity_index.lock();
            for victim in &victims {
                for (envelope, entity) in index.query_contained(victim.envelope()) {
                    if survivors.iter().any(|s| s.intersects(&envelope)) {
                        continue;
                    }
                    if index.remove(&envelope, &entity) {
                        removed += 1;
                    }
                }
            }
        }

        CacheCounters::add(&self.counters.tiles_evicted, victims.len() as u64);
        info!(
            evicted = victims.len(),
            skipped_busy = busy,
            entities_removed = removed,
            target,
            "Compacted cache"
        );
        victims.len()
    }

    /// Cancels every waiter and empties both indexes.
    pub fn clear_cache(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let old_tiles = std::mem::take(&mut *self.query_index.lock());
        let tiles = old_tiles.query_all();
        let cancelled: usize = tiles.iter().map(|tile| tile.detach()).sum();

        let old_entities = std::mem::take(&mut *self.entity_index.lock());

        CacheCounters::bump(&self.counters.clears);
        info!(
            tiles = tiles.len(),
            entities = old_entities.len(),
            cancelled,
            "Cleared cache"
        );
    }
}

impl<S: DataSource> TileBackend<Entity<S>> for CacheInner<S> {
    fn read_cached(&self, envelope: &Envelope) -> Vec<Arc<Entity<S>>> {
        self.entity_index.lock().query(envelope)
    }

    fn schedule_fetch(&self, tile: Arc<DataTile<Entity<S>>>, ticket: FetchTicket) {
        // Epoch before filter: a filter change is always followed by a bump
        let epoch = self.epoch.load(Ordering::SeqCst);
        let filter = self.filter.read().scoped(tile.envelope());

        let Some(inner) = self.self_ref.upgrade() else {
            tile.complete_job(ticket.job_id, Err(AbortReason::Canceled));
            return;
        };

        debug!(tile = %tile.envelope(), job = ticket.job_id, "Scheduling fetch");
        self.pool.spawn(inner.run_fetch(tile, ticket, filter, epoch));
    }

    fn next_access(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}
