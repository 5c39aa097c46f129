//! Write-once future returned by [`crate::extension::DynamicExtension::query`]
//! (spec §4.6 `query(params) -> Future<Vec<R>>`, §4.8 "query futures block at
//! `future.get()` until the query worker completes").
//!
//! Grounded on a single-shot `crossbeam_channel::bounded(1)` rendezvous
//! rather than a hand-rolled park/unpark primitive, matching the channel-
//! based signalling the teacher's flush/compaction threads use.

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::error::{DynamicExtensionError, Result};

pub struct QueryFuture<T> {
    rx: Receiver<T>,
}

pub struct QueryPromise<T> {
    tx: Sender<T>,
}

/// A connected promise/future pair. The scheduler's query worker holds the
/// promise and resolves it exactly once; the caller holds the future.
pub fn pair<T>() -> (QueryPromise<T>, QueryFuture<T>) {
    let (tx, rx) = bounded(1);
    (QueryPromise { tx }, QueryFuture { rx })
}

impl<T> QueryPromise<T> {
    pub fn resolve(self, value: T) {
        // The receiver may have been dropped if the caller gave up on the
        // future; that is not an error for the worker that produced a result.
        let _ = self.tx.send(value);
    }
}

impl<T> QueryFuture<T> {
    /// Blocks until the query worker resolves the promise.
    pub fn get(self) -> Result<T> {
        self.rx.recv().map_err(|_| DynamicExtensionError::QueryWorkerPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_then_get_round_trips_the_value() {
        let (promise, future) = pair::<i32>();
        promise.resolve(42);
        assert_eq!(future.get().unwrap(), 42);
    }

    #[test]
    fn dropping_the_promise_without_resolving_surfaces_as_an_error() {
        let (promise, future) = pair::<i32>();
        drop(promise);
        assert!(future.get().is_err());
    }
}
