//! Queue-backed sinks with dedicated worker threads.

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ShutdownToken, Sink};

/// The processing step a [`ThreadedSink`] worker drives.
///
/// `process` is invoked for every dequeued item, `tick` at least once per
/// tick interval (also while the queue is busy), and `post_run` exactly
/// once after the queue has been drained on shutdown.
pub trait Stage: Send {
    type Input: Send;

    fn process(&mut self, item: Self::Input);

    fn tick(&mut self) {}

    fn post_run(&mut self) {}
}

/// Observes the backlog of a threaded sink's queue, for cluster-log
/// reporting.
#[derive(Clone)]
pub struct QueueProbe {
    name: String,
    len: Arc<dyn Fn() -> usize + Send + Sync>,
}

impl QueueProbe {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        (self.len)()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Joins a worker thread at shutdown.
pub struct WorkerHandle {
    name: String,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Wraps an externally spawned thread so it joins like any other
    /// worker.
    pub fn new(name: &str, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.to_string(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("worker '{}' panicked", self.name);
        }
    }
}

/// A sink backed by an unbounded FIFO queue and a dedicated worker thread.
///
/// `submit` enqueues and returns immediately. The worker dequeues items and
/// hands them to its [`Stage`]; when the queue stays empty it wakes once per
/// tick interval so stages can advance wall-clock driven work. On
/// cancellation the worker drains whatever is left in the queue, calls the
/// stage's `post_run` hook and exits.
pub struct ThreadedSink<T> {
    tx: Sender<T>,
    name: String,
}

impl<T: Send + 'static> ThreadedSink<T> {
    pub fn spawn<S>(
        name: &str,
        tick_interval: Duration,
        stop: ShutdownToken,
        mut stage: S,
    ) -> (Arc<Self>, WorkerHandle)
    where
        S: Stage<Input = T> + 'static,
    {
        let (tx, rx) = unbounded::<T>();
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut last_tick = Instant::now();
                loop {
                    if stop.is_cancelled() {
                        break;
                    }
                    match rx.recv_timeout(tick_interval) {
                        Ok(item) => stage.process(item),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if last_tick.elapsed() >= tick_interval {
                        stage.tick();
                        last_tick = Instant::now();
                    }
                }

                let mut drained = 0_usize;
                while let Ok(item) = rx.try_recv() {
                    stage.process(item);
                    drained += 1;
                }
                if drained > 0 {
                    debug!("drained {drained} queued items on shutdown");
                }
                stage.post_run();
            })
            .expect("failed to spawn worker thread");

        let sink = Arc::new(Self {
            tx,
            name: name.to_string(),
        });
        let worker = WorkerHandle {
            name: name.to_string(),
            handle,
        };
        (sink, worker)
    }

    pub fn probe(&self) -> QueueProbe {
        let tx = self.tx.clone();
        QueueProbe {
            name: self.name.clone(),
            len: Arc::new(move || tx.len()),
        }
    }
}

impl<T: Send> Sink<T> for ThreadedSink<T> {
    fn submit(&self, item: T) {
        // A send error means the worker is gone; during shutdown that is
        // expected and the message is intentionally dropped.
        if self.tx.send(item).is_err() {
            debug!("sink '{}' is shut down, dropping message", self.name);
        }
    }
}

/// A worker without an input queue, stepped at a fixed cadence until
/// cancelled. Used for components that only produce (e.g. the state
/// supervisor's cluster-log emission).
pub struct PeriodicWorker;

impl PeriodicWorker {
    pub fn spawn<F>(name: &str, interval: Duration, stop: ShutdownToken, mut step: F) -> WorkerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut next = Instant::now() + interval;
                while !stop.is_cancelled() {
                    let now = Instant::now();
                    if now >= next {
                        step();
                        next = now + interval;
                    }
                    // Bounded nap so cancellation stays responsive.
                    std::thread::sleep(interval.min(Duration::from_millis(200)));
                }
            })
            .expect("failed to spawn worker thread");

        WorkerHandle {
            name: name.to_string(),
            handle,
        }
    }
}
