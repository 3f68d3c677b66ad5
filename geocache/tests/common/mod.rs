//! Shared fixtures for integration tests.
//!
//! [`MockSource`] serves a fixed set of entities and can hold fetches in
//! flight, fail chosen envelopes, or panic, so tests can drive the cache
//! through every job outcome.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use geocache::cache::{tile_callback, AbortReason, DataCache, TileCallback};
use geocache::config::CacheConfig;
use geocache::coord::{Envelope, GeoBounds, Tile};
use geocache::coordinator::BBoxCallback;
use geocache::executor::WorkerPool;
use geocache::source::{DataSource, Filter, SourceError, SpatialEntity};

/// How long a test waits for an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a test waits to confirm nothing else arrives.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

// ============================================================================
// Mock entity and filter
// ============================================================================

#[derive(Debug, Clone)]
pub struct MockEntity {
    pub id: String,
    pub envelope: Envelope,
    pub rank: u32,
}

impl MockEntity {
    pub fn new(id: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            id: id.into(),
            envelope,
            rank: 0,
        }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }
}

impl SpatialEntity for MockEntity {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn envelope(&self) -> Envelope {
        self.envelope
    }
}

/// Entity at the centre of `tile`.
pub fn at_center(id: &str, tile: &Tile) -> MockEntity {
    let (x, y) = tile.envelope().center();
    MockEntity::new(id, Envelope::point(x, y))
}

/// Entity on the east edge of `tile`, shared with its eastern neighbour.
pub fn on_east_edge(id: &str, tile: &Tile) -> MockEntity {
    let env = tile.envelope();
    let (_, y) = env.center();
    MockEntity::new(id, Envelope::point(env.max_x, y))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockFilter {
    pub envelope: Option<Envelope>,
    pub min_rank: u32,
}

impl MockFilter {
    pub fn min_rank(min_rank: u32) -> Self {
        Self {
            envelope: None,
            min_rank,
        }
    }
}

impl Filter for MockFilter {
    fn scoped(&self, envelope: &Envelope) -> Self {
        Self {
            envelope: Some(*envelope),
            min_rank: self.min_rank,
        }
    }
}

// ============================================================================
// Mock source
// ============================================================================

/// Blocks fetches while closed.
#[derive(Default)]
struct Gate {
    closed: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    fn set_closed(&self, closed: bool) {
        *self.closed.lock() = closed;
        self.changed.notify_all();
    }

    fn pass(&self) {
        let mut closed = self.closed.lock();
        while *closed {
            self.changed.wait(&mut closed);
        }
    }
}

#[derive(Default)]
pub struct MockSource {
    entities: Mutex<Vec<MockEntity>>,
    fetched: Mutex<Vec<Envelope>>,
    fetches: AtomicUsize,
    failing: Mutex<Vec<Envelope>>,
    panicking: Mutex<Vec<Envelope>>,
    gate: Gate,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_entities(entities: Vec<MockEntity>) -> Arc<Self> {
        let source = Self::default();
        *source.entities.lock() = entities;
        Arc::new(source)
    }

    /// Holds every fetch until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.set_closed(true);
    }

    pub fn release(&self) {
        self.gate.set_closed(false);
    }

    /// Fetches scoped to `envelope` fail with a connection error.
    pub fn fail_on(&self, envelope: Envelope) {
        self.failing.lock().push(envelope);
    }

    /// Fetches scoped to `envelope` panic.
    pub fn panic_on(&self, envelope: Envelope) {
        self.panicking.lock().push(envelope);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetches_for(&self, envelope: &Envelope) -> usize {
        self.fetched.lock().iter().filter(|e| *e == envelope).count()
    }
}

impl DataSource for MockSource {
    type Entity = MockEntity;
    type Filter = MockFilter;

    fn name(&self) -> &str {
        "mock"
    }

    fn fetch(&self, filter: &MockFilter) -> Result<Vec<MockEntity>, SourceError> {
        let scope = filter.envelope.unwrap_or_else(Envelope::world);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().push(scope);

        self.gate.pass();

        if self.panicking.lock().contains(&scope) {
            panic!("mock source panicked for {}", scope);
        }
        if self.failing.lock().contains(&scope) {
            return Err(SourceError::Connection(format!("unreachable for {}", scope)));
        }

        Ok(self
            .entities
            .lock()
            .iter()
            .filter(|e| e.envelope.intersects(&scope) && e.rank >= filter.min_rank)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Cache construction
// ============================================================================

pub fn new_cache(source: &Arc<MockSource>, config: CacheConfig) -> DataCache<MockSource> {
    let pool = WorkerPool::from_current(config.workers).expect("runtime available");
    DataCache::with_shared_source(Arc::clone(source), MockFilter::default(), config, pool)
        .expect("valid config")
}

// ============================================================================
// Callback collectors
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TileEvent {
    Data(Vec<String>),
    Abort(AbortReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BBoxEvent {
    Progress(usize, usize),
    Data(Vec<String>),
    Abort(AbortReason),
}

fn ids(data: &[Arc<MockEntity>]) -> Vec<String> {
    let mut ids: Vec<String> = data.iter().map(|e| e.id.clone()).collect();
    ids.sort();
    ids
}

/// Tile callback forwarding every call into a channel.
pub fn tile_collector() -> (
    Arc<dyn TileCallback<MockEntity>>,
    UnboundedReceiver<TileEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let abort_tx = tx.clone();
    let callback = tile_callback(
        move |data: Vec<Arc<MockEntity>>| {
            let _ = tx.send(TileEvent::Data(ids(&data)));
        },
        move |reason| {
            let _ = abort_tx.send(TileEvent::Abort(reason));
        },
    );
    (callback, rx)
}

/// Tile callback that ignores its results.
pub fn ignore() -> Arc<dyn TileCallback<MockEntity>> {
    tile_callback(|_: Vec<Arc<MockEntity>>| {}, |_| {})
}

struct BBoxCollector {
    tx: mpsc::UnboundedSender<BBoxEvent>,
}

impl BBoxCallback<MockEntity> for BBoxCollector {
    fn on_progress_update(&self, done: usize, total: usize) {
        let _ = self.tx.send(BBoxEvent::Progress(done, total));
    }

    fn on_receive_data_update(&self, _bounds: &GeoBounds, data: Vec<Arc<MockEntity>>) {
        let _ = self.tx.send(BBoxEvent::Data(ids(&data)));
    }

    fn on_abort(&self, _bounds: &GeoBounds, reason: AbortReason) {
        let _ = self.tx.send(BBoxEvent::Abort(reason));
    }
}

pub fn bbox_collector() -> (Arc<dyn BBoxCallback<MockEntity>>, UnboundedReceiver<BBoxEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(BBoxCollector { tx }), rx)
}

/// Next event, failing the test after [`EVENT_TIMEOUT`].
pub async fn next_event<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

/// Every event that arrives until the channel stays quiet.
pub async fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, rx.recv()).await {
        events.push(event);
    }
    events
}

/// Polls `condition` until it holds, failing the test after [`EVENT_TIMEOUT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn id_set(ids: &[String]) -> HashSet<String> {
    ids.iter().cloned().collect()
}

/// A zoom-14 tile over Berlin.
pub fn berlin_tile() -> Tile {
    Tile::new(8800, 5373, 14)
}
