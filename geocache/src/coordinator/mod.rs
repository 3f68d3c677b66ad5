//! Bounding-box request coordination.
//!
//! A bounding-box query is split into the rectangular grid of tiles covering
//! it at the cache's zoom level. Each cell is requested from the cache
//! independently; results are merged with deduplication by entity key and
//! delivered to the caller once every cell has resolved.
//!
//! ```text
//!   bbox ──► tile grid W × H ──► W*H tile requests ──► cache
//!                                      │
//!           progress(done, total) ◄────┤ per cell
//!                                      │
//!           on_receive_data_update ◄───┘ once, when done == total
//! ```
//!
//! # Termination
//!
//! A request ends with exactly one of: one data delivery, or one
//! `Canceled` abort. A cell failing for any other reason is forwarded to the
//! caller as it happens; the request then never delivers data but stays
//! cancellable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{AbortReason, DataCache, TileCallback, TileRequestHandle};
use crate::coord::{GeoBounds, TileRange};
use crate::source::{DataSource, SpatialEntity};

/// Receiver for a bounding-box request.
pub trait BBoxCallback<E>: Send + Sync {
    /// Called once per cell resolved with data, with `done` counting up.
    fn on_progress_update(&self, _done: usize, _total: usize) {}

    /// Called once with the deduplicated entities of every cell.
    fn on_receive_data_update(&self, bounds: &GeoBounds, data: Vec<Arc<E>>);

    /// Called when a cell fails, or once when the request is cancelled.
    fn on_abort(&self, bounds: &GeoBounds, reason: AbortReason);
}

type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// [`BBoxCallback`] built from closures.
pub struct FnBBoxCallback<D, A> {
    on_data: D,
    on_abort: A,
    on_progress: Option<ProgressFn>,
}

impl<D, A> FnBBoxCallback<D, A> {
    pub fn new<E>(on_data: D, on_abort: A) -> Self
    where
        D: Fn(&GeoBounds, Vec<Arc<E>>) + Send + Sync,
        A: Fn(&GeoBounds, AbortReason) + Send + Sync,
    {
        Self {
            on_data,
            on_abort,
            on_progress: None,
        }
    }

    pub fn with_progress(
        mut self,
        on_progress: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }
}

impl<E, D, A> BBoxCallback<E> for FnBBoxCallback<D, A>
where
    D: Fn(&GeoBounds, Vec<Arc<E>>) + Send + Sync,
    A: Fn(&GeoBounds, AbortReason) + Send + Sync,
{
    fn on_progress_update(&self, done: usize, total: usize) {
        if let Some(progress) = &self.on_progress {
            progress(done, total);
        }
    }

    fn on_receive_data_update(&self, bounds: &GeoBounds, data: Vec<Arc<E>>) {
        (self.on_data)(bounds, data)
    }

    fn on_abort(&self, bounds: &GeoBounds, reason: AbortReason) {
        (self.on_abort)(bounds, reason)
    }
}

/// Wraps a pair of closures as a shareable bounding-box callback.
pub fn bbox_callback<E, D, A>(on_data: D, on_abort: A) -> Arc<dyn BBoxCallback<E>>
where
    E: 'static,
    D: Fn(&GeoBounds, Vec<Arc<E>>) + Send + Sync + 'static,
    A: Fn(&GeoBounds, AbortReason) + Send + Sync + 'static,
{
    Arc::new(FnBBoxCallback::new(on_data, on_abort))
}

// =============================================================================
// Request state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellState {
    Pending,
    Done,
    Failed,
}

struct Aggregate<E: SpatialEntity> {
    cells: Vec<CellState>,
    done: usize,
    seen: HashSet<E::Key>,
    data: Vec<Arc<E>>,
}

/// One in-flight bounding-box request.
pub(crate) struct BBoxRequest<E: SpatialEntity> {
    bounds: GeoBounds,
    range: Option<TileRange>,
    total: usize,
    callback: Arc<dyn BBoxCallback<E>>,
    active: AtomicBool,
    state: Mutex<Aggregate<E>>,
    done: AtomicUsize,
    /// Last progress value handed to the callback.
    reported: Mutex<usize>,
    handles: Mutex<Vec<TileRequestHandle<E>>>,
}

impl<E: SpatialEntity> BBoxRequest<E> {
    /// Splits `bounds` into tiles and requests every cell from `cache`.
    pub(crate) fn start<S>(
        cache: &DataCache<S>,
        bounds: GeoBounds,
        callback: Arc<dyn BBoxCallback<E>>,
        force_update: bool,
    ) -> BBoxRequestHandle<E>
    where
        S: DataSource<Entity = E>,
    {
        let range = match bounds.tile_range(cache.zoom()) {
            Ok(range) => range,
            Err(e) => {
                warn!(bounds = %bounds, error = %e, "Cannot decompose bounding box");
                let request = Arc::new(Self::new(bounds, None, callback));
                request.active.store(false, Ordering::SeqCst);
                request.callback.on_abort(&bounds, AbortReason::Unknown);
                return BBoxRequestHandle { request };
            }
        };

        let request = Arc::new(Self::new(bounds, Some(range), callback));
        debug!(
            bounds = %bounds,
            zoom = range.zoom,
            width = range.width(),
            height = range.height(),
            "Starting bounding-box request"
        );

        for (index, tile) in range.tiles().enumerate() {
            if !request.is_active() {
                break;
            }
            let cell: Arc<dyn TileCallback<E>> = Arc::new(CellCallback {
                request: Arc::clone(&request),
                index,
            });
            let handle = cache.get_data_by_tile(&tile, cell, force_update);
            request.handles.lock().push(handle);
        }

        // Cells dispatched after a concurrent cancel
        if !request.is_active() {
            request.cancel_cells();
        }

        BBoxRequestHandle { request }
    }

    fn new(
        bounds: GeoBounds,
        range: Option<TileRange>,
        callback: Arc<dyn BBoxCallback<E>>,
    ) -> Self {
        let total = range.map_or(0, |r| r.len());
        Self {
            bounds,
            range,
            total,
            callback,
            active: AtomicBool::new(true),
            state: Mutex::new(Aggregate {
                cells: vec![CellState::Pending; total],
                done: 0,
                seen: HashSet::new(),
                data: Vec::new(),
            }),
            done: AtomicUsize::new(0),
            reported: Mutex::new(0),
            handles: Mutex::new(Vec::with_capacity(total)),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns `true` for exactly one caller.
    fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    fn cancel_cells(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            handle.cancel();
        }
    }

    fn cell_resolved(&self, index: usize, data: Vec<Arc<E>>) {
        if !self.is_active() {
            return;
        }

        let finished = {
            let mut agg = self.state.lock();
            if agg.cells.get(index) != Some(&CellState::Pending) {
                return;
            }
            agg.cells[index] = CellState::Done;
            agg.done += 1;
            for entity in data {
                if agg.seen.insert(entity.key()) {
                    agg.data.push(entity);
                }
            }

            self.done.store(agg.done, Ordering::SeqCst);
            if agg.done == self.total {
                Some(std::mem::take(&mut agg.data))
            } else {
                None
            }
        };

        self.report_progress();

        if let Some(data) = finished {
            if self.deactivate() {
                debug!(bounds = %self.bounds, entities = data.len(), "Bounding-box request complete");
                self.callback.on_receive_data_update(&self.bounds, data);
            }
        }
    }

    /// Reports every progress step not yet reported, in order.
    fn report_progress(&self) {
        let mut reported = self.reported.lock();
        let done = self.done.load(Ordering::SeqCst);
        while *reported < done {
            *reported += 1;
            self.callback.on_progress_update(*reported, self.total);
        }
    }

    fn cell_aborted(&self, index: usize, reason: AbortReason) {
        if reason.is_canceled() {
            if self.deactivate() {
                debug!(bounds = %self.bounds, "Bounding-box request cancelled by cache");
                self.callback.on_abort(&self.bounds, AbortReason::Canceled);
                self.cancel_cells();
            }
            return;
        }

        if !self.is_active() {
            return;
        }

        let forward = {
            let mut agg = self.state.lock();
            match agg.cells.get_mut(index) {
                Some(cell) if *cell == CellState::Pending => {
                    *cell = CellState::Failed;
                    true
                }
                _ => false,
            }
        };

        if forward {
            warn!(bounds = %self.bounds, cell = index, reason = %reason, "Bounding-box cell failed");
            self.callback.on_abort(&self.bounds, reason);
        }
    }
}

struct CellCallback<E: SpatialEntity> {
    request: Arc<BBoxRequest<E>>,
    index: usize,
}

impl<E: SpatialEntity> TileCallback<E> for CellCallback<E> {
    fn on_data(&self, data: Vec<Arc<E>>) {
        self.request.cell_resolved(self.index, data);
    }

    fn on_abort(&self, reason: AbortReason) {
        self.request.cell_aborted(self.index, reason);
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cancellation handle for a bounding-box request.
pub struct BBoxRequestHandle<E: SpatialEntity> {
    request: Arc<BBoxRequest<E>>,
}

impl<E: SpatialEntity> BBoxRequestHandle<E> {
    /// Cancels the request.
    ///
    /// Delivers one `Canceled` abort if the request had not finished, then
    /// cancels the outstanding tile requests.
    pub fn cancel(&self) {
        let request = &self.request;
        if request.deactivate() {
            debug!(bounds = %request.bounds, "Bounding-box request cancelled");
            request
                .callback
                .on_abort(&request.bounds, AbortReason::Canceled);
        }
        request.cancel_cells();
    }

    /// True until the request delivered data or was cancelled.
    pub fn is_active(&self) -> bool {
        self.request.is_active()
    }

    pub fn bounds(&self) -> &GeoBounds {
        &self.request.bounds
    }

    /// Tile grid covering the bounds, if it could be computed.
    pub fn tile_range(&self) -> Option<TileRange> {
        self.request.range
    }

    /// Number of grid cells.
    pub fn total_cells(&self) -> usize {
        self.request.total
    }

    /// Number of cells that resolved with data.
    pub fn completed_cells(&self) -> usize {
        self.request.done.load(Ordering::SeqCst)
    }
}

impl<E: SpatialEntity> Clone for BBoxRequestHandle<E> {
    fn clone(&self) -> Self {
        Self {
            request: Arc::clone(&self.request),
        }
    }
}

impl<E: SpatialEntity> std::fmt::Debug for BBoxRequestHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BBoxRequestHandle")
            .field("bounds", &self.request.bounds)
            .field("total", &self.request.total)
            .field("active", &self.is_active())
            .finish()
    }
}
