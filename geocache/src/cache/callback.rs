//! Per-tile callback surface and request handles.
//!
//! Every cache request registers a [`TileCallback`] and gets a
//! [`TileRequestHandle`] back immediately. Exactly one terminal call is made on
//! the callback: either [`TileCallback::on_data`] or [`TileCallback::on_abort`].
//!
//! # Thread Safety
//!
//! Callbacks run on whichever thread resolves the request: the caller's own
//! thread for a cache hit, a worker thread after a fetch. Implementations must
//! be `Send + Sync` and should return quickly.

use std::fmt;
use std::sync::{Arc, Weak};

use super::tile::DataTile;
use crate::source::SpatialEntity;

/// Why a request ended without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// The upstream could not be reached. Retrying may succeed.
    Connection,
    /// Any other fetch failure.
    Unknown,
    /// The request was cancelled or superseded. Not an error.
    Canceled,
}

impl AbortReason {
    /// True if the caller may reasonably retry the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AbortReason::Connection | AbortReason::Unknown)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, AbortReason::Canceled)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Connection => write!(f, "connection failure"),
            AbortReason::Unknown => write!(f, "unknown failure"),
            AbortReason::Canceled => write!(f, "canceled"),
        }
    }
}

/// Receiver for the result of a single tile or envelope request.
pub trait TileCallback<E>: Send + Sync {
    /// Called with the entities intersecting the requested envelope.
    fn on_data(&self, data: Vec<Arc<E>>);

    /// Called when the request ends without data.
    fn on_abort(&self, reason: AbortReason);
}

/// [`TileCallback`] built from two closures.
pub struct FnTileCallback<D, A> {
    on_data: D,
    on_abort: A,
}

impl<E, D, A> TileCallback<E> for FnTileCallback<D, A>
where
    D: Fn(Vec<Arc<E>>) + Send + Sync,
    A: Fn(AbortReason) + Send + Sync,
{
    fn on_data(&self, data: Vec<Arc<E>>) {
        (self.on_data)(data)
    }

    fn on_abort(&self, reason: AbortReason) {
        (self.on_abort)(reason)
    }
}

/// Wraps a pair of closures as a shareable tile callback.
///
/// # Example
///
/// ```
/// use geocache::cache::{tile_callback, AbortReason, TileCallback};
/// use geocache::source::PointFeature;
///
/// let cb = tile_callback(
///     |data: Vec<std::sync::Arc<PointFeature>>| println!("{} features", data.len()),
///     |reason: AbortReason| eprintln!("aborted: {}", reason),
/// );
/// cb.on_abort(AbortReason::Canceled);
/// ```
pub fn tile_callback<E, D, A>(on_data: D, on_abort: A) -> Arc<dyn TileCallback<E>>
where
    E: 'static,
    D: Fn(Vec<Arc<E>>) + Send + Sync + 'static,
    A: Fn(AbortReason) + Send + Sync + 'static,
{
    Arc::new(FnTileCallback { on_data, on_abort })
}

/// Cancellation handle for one registered waiter.
///
/// Cancelling removes only this waiter; a fetch serving other waiters keeps
/// running. Handles for requests answered synchronously from the cache are
/// inert.
pub struct TileRequestHandle<E> {
    waiter: Option<(Weak<DataTile<E>>, u64)>,
}

impl<E: SpatialEntity> TileRequestHandle<E> {
    pub(crate) fn waiting(tile: &Arc<DataTile<E>>, waiter_id: u64) -> Self {
        Self {
            waiter: Some((Arc::downgrade(tile), waiter_id)),
        }
    }

    pub(crate) fn resolved() -> Self {
        Self { waiter: None }
    }

    /// Cancels the request.
    ///
    /// Delivers `AbortReason::Canceled` to the callback if the request was
    /// still waiting. Calling this after the request resolved is a no-op.
    pub fn cancel(&self) {
        if let Some((tile, waiter_id)) = &self.waiter {
            if let Some(tile) = tile.upgrade() {
                tile.cancel_waiter(*waiter_id);
            }
        }
    }

    /// True if the request is still waiting for a fetch.
    pub fn is_pending(&self) -> bool {
        match &self.waiter {
            Some((tile, waiter_id)) => tile
                .upgrade()
                .is_some_and(|tile| tile.has_waiter(*waiter_id)),
            None => false,
        }
    }
}

impl<E> Clone for TileRequestHandle<E> {
    fn clone(&self) -> Self {
        Self {
            waiter: self.waiter.clone(),
        }
    }
}

impl<E> fmt::Debug for TileRequestHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileRequestHandle")
            .field("waiter", &self.waiter.as_ref().map(|(_, id)| *id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PointFeature;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_abort_reason_classification() {
        assert!(AbortReason::Connection.is_retryable());
        assert!(AbortReason::Unknown.is_retryable());
        assert!(!AbortReason::Canceled.is_retryable());
        assert!(AbortReason::Canceled.is_canceled());
    }

    #[test]
    fn test_abort_reason_display() {
        assert_eq!(AbortReason::Connection.to_string(), "connection failure");
        assert_eq!(AbortReason::Canceled.to_string(), "canceled");
    }

    #[test]
    fn test_fn_callback_dispatch() {
        let data_calls = Arc::new(AtomicUsize::new(0));
        let abort_calls = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&data_calls);
        let a = Arc::clone(&abort_calls);

        let cb = tile_callback::<PointFeature, _, _>(
            move |data| {
                d.fetch_add(data.len(), Ordering::SeqCst);
            },
            move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            },
        );

        cb.on_data(vec![Arc::new(PointFeature::new("a", 0.0, 0.0))]);
        cb.on_abort(AbortReason::Unknown);
        assert_eq!(data_calls.load(Ordering::SeqCst), 1);
        assert_eq!(abort_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolved_handle_is_inert() {
        let handle = TileRequestHandle::<PointFeature>::resolved();
        assert!(!handle.is_pending());
        handle.cancel();
    }
}
