//! Typed sink fabric connecting pipeline components.
//!
//! A component that consumes values of type `T` exposes [`Sink<T>`]; a
//! component that consumes several message types registers one `Sink`
//! capability per type. Producers hold `Arc<dyn Sink<T>>` references and
//! never learn who is downstream. Cross-thread hops go through
//! [`ThreadedSink`], which owns the consumer's queue and worker thread.
//!
//! Submission is always non-blocking: queues are unbounded and backpressure
//! is an upstream concern. Within a single producer→consumer path the
//! submission order is preserved.

mod threaded;

pub use threaded::{PeriodicWorker, QueueProbe, Stage, ThreadedSink, WorkerHandle};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A consumer of values of type `T`.
///
/// `submit` must not block and must be safe to call from any thread.
pub trait Sink<T>: Send + Sync {
    fn submit(&self, item: T);
}

impl<T, S: Sink<T> + ?Sized> Sink<T> for Arc<S> {
    fn submit(&self, item: T) {
        (**self).submit(item);
    }
}

/// Fans every submitted value out to a dynamic list of downstream sinks.
///
/// Each subscriber sees the inputs in submission order; the interleaving
/// between subscribers is not constrained.
pub struct CollectionSink<T> {
    sinks: Vec<Arc<dyn Sink<T>>>,
}

impl<T> CollectionSink<T> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn push(&mut self, sink: Arc<dyn Sink<T>>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl<T> Default for CollectionSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> Sink<T> for CollectionSink<T> {
    fn submit(&self, item: T) {
        // Last subscriber takes the value by move.
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.submit(item.clone());
            }
            last.submit(item);
        }
    }
}

/// Adapts a sink of `T` into a sink of `U` through a conversion function.
///
/// Used to register multiple typed capabilities on top of a single internal
/// queue vocabulary, e.g. a supervisor accepting both hits and detector
/// info through one worker.
pub struct MapSink<U, T, F: Fn(U) -> T> {
    inner: Arc<dyn Sink<T>>,
    map: F,
    _marker: std::marker::PhantomData<fn(U)>,
}

impl<U, T, F: Fn(U) -> T> MapSink<U, T, F> {
    pub fn new(inner: Arc<dyn Sink<T>>, map: F) -> Self {
        Self {
            inner,
            map,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<U: Send, T: Send, F: Fn(U) -> T + Send + Sync> Sink<U> for MapSink<U, T, F> {
    fn submit(&self, item: U) {
        self.inner.submit((self.map)(item));
    }
}

/// Process-wide cooperative cancellation token.
///
/// The signal handler flips the token; every worker observes it at its loop
/// head, drains its queue, runs its shutdown hook and exits. No thread is
/// ever terminated forcibly.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<u32>>);

    impl Sink<u32> for Recorder {
        fn submit(&self, item: u32) {
            self.0.lock().unwrap().push(item);
        }
    }

    #[test]
    fn test_collection_sink_forwards_to_all() {
        let a = Arc::new(Recorder(Mutex::new(Vec::new())));
        let b = Arc::new(Recorder(Mutex::new(Vec::new())));

        let mut collection = CollectionSink::new();
        collection.push(a.clone());
        collection.push(b.clone());

        collection.submit(1);
        collection.submit(2);

        assert_eq!(*a.0.lock().unwrap(), vec![1, 2]);
        assert_eq!(*b.0.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_empty_collection_sink_discards() {
        let collection: CollectionSink<u32> = CollectionSink::new();
        collection.submit(7);
    }

    #[test]
    fn test_map_sink_converts() {
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mapped = MapSink::new(rec.clone() as Arc<dyn Sink<u32>>, |s: &str| s.len() as u32);

        mapped.submit("abc");
        mapped.submit("muon");

        assert_eq!(*rec.0.lock().unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_shutdown_token() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
