//! Per-envelope unit of caching.
//!
//! A [`DataTile`] owns the fetch state of one envelope: its waiters, the
//! (at most one) fetch job serving them, and freshness metadata.
//!
//! # State Machine
//!
//! ```text
//! Empty ──await──► Fetching ──ok──► Fresh ──TTL──► Stale ──await──► Fetching
//!                     │                │
//!                     └──err──► (previous state, data kept)
//!                                      └──force_update──► Fetching
//! ```
//!
//! Registering a waiter and deciding whether to schedule a job happen under
//! one lock, so a waiter added while a job is being dispatched either joins
//! that job or triggers a new one. The lock is never held while a callback
//! runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::callback::{AbortReason, TileCallback, TileRequestHandle};
use crate::coord::Envelope;
use crate::source::SpatialEntity;

/// Observable state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    /// Never fetched successfully.
    Empty,
    /// A fetch job is scheduled or running.
    Fetching,
    /// Data present and within the reload interval.
    Fresh,
    /// Data present but past the reload interval.
    Stale,
}

/// What the cache needs to provide for a tile to serve a request.
pub(crate) trait TileBackend<E>: Send + Sync {
    /// Cached entities intersecting `envelope`.
    fn read_cached(&self, envelope: &Envelope) -> Vec<Arc<E>>;

    /// Runs a fetch job for `tile` on the worker pool.
    fn schedule_fetch(&self, tile: Arc<DataTile<E>>, ticket: FetchTicket);

    /// Next value of the cache-wide access clock.
    fn next_access(&self) -> u64;
}

/// Identifies one scheduled fetch job of a tile.
#[derive(Debug, Clone)]
pub(crate) struct FetchTicket {
    pub job_id: u64,
    pub token: CancellationToken,
}

/// How an `await_data` call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AwaitOutcome {
    /// Answered synchronously from cached data.
    Hit,
    /// Joined a job that was already scheduled.
    Joined,
    /// Scheduled a new fetch job.
    Scheduled,
    /// The tile has been removed from the cache; the callback was not called.
    Refused,
}

struct Waiter<E> {
    envelope: Envelope,
    callback: Arc<dyn TileCallback<E>>,
}

struct JobSlot {
    id: u64,
    started: bool,
    token: CancellationToken,
}

struct TileState<E> {
    last_update: Option<Instant>,
    needs_update: bool,
    waiters: BTreeMap<u64, Waiter<E>>,
    next_waiter_id: u64,
    job: Option<JobSlot>,
    next_job_id: u64,
    detached: bool,
}

/// Time source of a tile.
pub(crate) type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Cached region of the query index.
pub struct DataTile<E> {
    envelope: Envelope,
    seq: u64,
    reload_interval: Option<Duration>,
    last_used: AtomicU64,
    clock: Clock,
    state: Mutex<TileState<E>>,
}

/// True if data stamped at `last_update` must be refreshed at `now`.
///
/// `None` for `reload_interval` means data never expires on its own.
pub(crate) fn requires_update_at(
    last_update: Option<Instant>,
    now: Instant,
    reload_interval: Option<Duration>,
) -> bool {
    match (last_update, reload_interval) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(stamp), Some(interval)) => now.saturating_duration_since(stamp) >= interval,
    }
}

impl<E: SpatialEntity> DataTile<E> {
    pub(crate) fn new(envelope: Envelope, seq: u64, reload_interval: Option<Duration>) -> Self {
        Self {
            envelope,
            seq,
            reload_interval,
            last_used: AtomicU64::new(0),
            clock: Arc::new(Instant::now),
            state: Mutex::new(TileState {
                last_update: None,
                needs_update: true,
                waiters: BTreeMap::new(),
                next_waiter_id: 0,
                job: None,
                next_job_id: 0,
                detached: false,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn requires_update(&self, state: &TileState<E>) -> bool {
        requires_update_at(state.last_update, (self.clock)(), self.reload_interval)
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Creation order within the owning cache.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Access-clock value of the most recent request.
    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// Records an access at `stamp` on the cache-wide access clock.
    pub(crate) fn touch(&self, stamp: u64) {
        self.last_used.store(stamp, Ordering::Relaxed);
    }

    pub fn status(&self) -> TileStatus {
        let state = self.state.lock();
        if state.job.is_some() {
            TileStatus::Fetching
        } else if state.last_update.is_none() {
            TileStatus::Empty
        } else if self.requires_update(&state) {
            TileStatus::Stale
        } else {
            TileStatus::Fresh
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn is_detached(&self) -> bool {
        self.state.lock().detached
    }

    pub(crate) fn has_waiter(&self, waiter_id: u64) -> bool {
        self.state.lock().waiters.contains_key(&waiter_id)
    }

    /// Registers interest in this tile's data for `envelope`.
    ///
    /// Fresh data is delivered before this returns. Otherwise the waiter is
    /// queued and a fetch job is scheduled unless one is already associated
    /// with the tile. A detached tile returns [`AwaitOutcome::Refused`] and
    /// leaves the callback to the caller.
    pub(crate) fn await_data(
        self: &Arc<Self>,
        backend: &dyn TileBackend<E>,
        envelope: Envelope,
        callback: Arc<dyn TileCallback<E>>,
        force_update: bool,
    ) -> (TileRequestHandle<E>, AwaitOutcome) {
        enum Action {
            Hit,
            Refuse,
            Join(u64),
            Schedule(u64, FetchTicket),
        }

        self.touch(backend.next_access());

        let action = {
            let mut state = self.state.lock();
            if state.detached {
                Action::Refuse
            } else {
                if force_update || self.requires_update(&state) {
                    state.needs_update = true;
                }

                if !state.needs_update {
                    Action::Hit
                } else {
                    let waiter_id = state.next_waiter_id;
                    state.next_waiter_id += 1;
                    state.waiters.insert(
                        waiter_id,
                        Waiter {
                            envelope,
                            callback: Arc::clone(&callback),
                        },
                    );

                    if state.job.is_some() {
                        Action::Join(waiter_id)
                    } else {
                        let ticket = FetchTicket {
                            job_id: state.next_job_id,
                            token: CancellationToken::new(),
                        };
                        state.next_job_id += 1;
                        state.job = Some(JobSlot {
                            id: ticket.job_id,
                            started: false,
                            token: ticket.token.clone(),
                        });
                        Action::Schedule(waiter_id, ticket)
                    }
                }
            }
        };

        match action {
            Action::Hit => {
                callback.on_data(backend.read_cached(&envelope));
                (TileRequestHandle::resolved(), AwaitOutcome::Hit)
            }
            Action::Refuse => (TileRequestHandle::resolved(), AwaitOutcome::Refused),
            Action::Join(waiter_id) => (
                TileRequestHandle::waiting(self, waiter_id),
                AwaitOutcome::Joined,
            ),
            Action::Schedule(waiter_id, ticket) => {
                backend.schedule_fetch(Arc::clone(self), ticket);
                (
                    TileRequestHandle::waiting(self, waiter_id),
                    AwaitOutcome::Scheduled,
                )
            }
        }
    }

    /// Marks job `job_id` as running.
    ///
    /// Returns `false` if the job was dequeued in the meantime and must not
    /// call the data source.
    pub(crate) fn begin_job(&self, job_id: u64) -> bool {
        let mut state = self.state.lock();
        match state.job.as_mut() {
            Some(job) if job.id == job_id && !job.token.is_cancelled() => {
                job.started = true;
                true
            }
            _ => false,
        }
    }

    /// Finishes job `job_id` and resolves every current waiter.
    ///
    /// On failure the previous data and its timestamp are kept.
    pub(crate) fn complete_job(&self, job_id: u64, outcome: Result<Vec<Arc<E>>, AbortReason>) {
        let waiters = {
            let mut state = self.state.lock();
            match state.job.as_ref() {
                Some(job) if job.id == job_id => {}
                _ => return,
            }
            state.job = None;

            match &outcome {
                Ok(_) => {
                    state.last_update = Some((self.clock)());
                    state.needs_update = false;
                }
                Err(_) => {
                    state.needs_update = self.requires_update(&state);
                }
            }
            std::mem::take(&mut state.waiters)
        };

        match outcome {
            Ok(data) => {
                for waiter in waiters.into_values() {
                    let subset = data
                        .iter()
                        .filter(|e| e.envelope().intersects(&waiter.envelope))
                        .cloned()
                        .collect();
                    waiter.callback.on_data(subset);
                }
            }
            Err(reason) => {
                for waiter in waiters.into_values() {
                    waiter.callback.on_abort(reason);
                }
            }
        }
    }

    /// Removes one waiter and delivers it a cancellation.
    ///
    /// If no waiters remain and the job has not started yet, the job is
    /// dequeued. A running job cannot be interrupted.
    pub(crate) fn cancel_waiter(&self, waiter_id: u64) -> bool {
        let waiter = {
            let mut state = self.state.lock();
            let Some(waiter) = state.waiters.remove(&waiter_id) else {
                return false;
            };
            if state.waiters.is_empty() {
                let unstarted = state.job.as_ref().is_some_and(|job| !job.started);
                if unstarted {
                    if let Some(job) = state.job.take() {
                        job.token.cancel();
                    }
                }
            }
            waiter
        };

        waiter.callback.on_abort(AbortReason::Canceled);
        true
    }

    /// Removes the tile from service if nothing is waiting on it.
    ///
    /// Returns `false`, leaving the tile untouched, while it has waiters or a
    /// fetch job.
    pub(crate) fn detach_if_idle(&self) -> bool {
        let mut state = self.state.lock();
        if state.detached || state.job.is_some() || !state.waiters.is_empty() {
            return false;
        }
        state.detached = true;
        true
    }

    /// Removes the tile from service, cancelling every waiter.
    ///
    /// Returns the number of waiters that were cancelled.
    pub(crate) fn detach(&self) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            state.detached = true;
            if let Some(job) = state.job.take() {
                job.token.cancel();
            }
            std::mem::take(&mut state.waiters)
        };

        let count = waiters.len();
        for waiter in waiters.into_values() {
            waiter.callback.on_abort(AbortReason::Canceled);
        }
        count
    }
}

impl<E> std::fmt::Debug for DataTile<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataTile")
            .field("envelope", &self.envelope)
            .field("seq", &self.seq)
            .field("last_used", &self.last_used.load(Ordering::Relaxed))
            .finish()
    }
}
