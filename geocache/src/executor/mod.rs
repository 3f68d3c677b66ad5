//! Bounded worker pool for fetch jobs.
//!
//! A [`WorkerPool`] runs fetch jobs on a tokio runtime while bounding how many
//! of them talk to a data source at the same time. Jobs are spawned
//! immediately and then wait for a permit, so a job cancelled while waiting
//! never touches the source.
//!
//! ```text
//! schedule ──► spawn ──► wait for permit ──► run (blocking thread) ──► release
//!                            │
//!                            └── cancelled ──► dequeued
//! ```
//!
//! The pool is cheap to clone and may be shared by several caches.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Default number of concurrent fetch jobs.
pub const DEFAULT_WORKERS: usize = 4;

/// Errors from creating a worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No tokio runtime was available on the calling thread.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// A pool needs at least one worker.
    #[error("worker pool size must be at least 1")]
    ZeroWorkers,
}

/// Concurrency-bounded executor backed by a tokio runtime handle.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
    in_flight: Arc<AtomicUsize>,
}

/// Permission to run one job. Released on drop.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl WorkerPool {
    /// Creates a pool running jobs on `handle`.
    ///
    /// # Arguments
    ///
    /// * `handle` - Runtime the jobs are spawned on
    /// * `size` - Maximum number of jobs running at once
    pub fn new(handle: Handle, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroWorkers);
        }

        tracing::debug!(workers = size, "Created worker pool");

        Ok(Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            size,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Creates a pool on the runtime of the calling thread.
    pub fn from_current(size: usize) -> Result<Self, PoolError> {
        let handle = Handle::try_current().map_err(|e| PoolError::NoRuntime(e.to_string()))?;
        Self::new(handle, size)
    }

    /// Spawns a job future on the pool's runtime.
    ///
    /// The future is responsible for acquiring a permit via [`acquire`](Self::acquire).
    pub fn spawn<F>(&self, job: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(job)
    }

    /// Runs blocking work on the runtime's blocking thread pool.
    pub fn spawn_blocking<F, R>(&self, work: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(work)
    }

    /// Waits for a free worker slot.
    ///
    /// Returns `None` only if the pool was closed.
    pub async fn acquire(&self) -> Option<WorkerPermit> {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Some(WorkerPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Maximum number of concurrent jobs.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of free worker slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of jobs currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}
