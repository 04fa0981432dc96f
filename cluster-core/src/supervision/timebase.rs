//! Adaptive coincidence-window controller.
//!
//! The coincidence filter owns a [`TimebaseSupervisor`] and feeds it the
//! span of every finalized combined event; the supervisor retunes the
//! effective coincidence window from those spans. The published value lives
//! in a shared atomic snapshot ([`TimebaseHandle`]) so other components
//! (the state supervisor's cluster log) can read it without any coupling to
//! the filter's thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::analysis::RingBuffer;
use crate::messages::TimebaseSample;

#[derive(Debug, Clone)]
pub struct TimebaseConfig {
    /// Number of recent event spans considered.
    pub window: usize,
    /// Safety margin added on top of the largest observed span, ns.
    pub margin_ns: u64,
    /// Lower clamp for the published timebase, ns.
    pub minimum_ns: u64,
    /// Upper clamp for the published timebase, ns.
    pub maximum_ns: u64,
    /// Relative change required before a new value is published.
    pub relative_threshold: f64,
}

impl Default for TimebaseConfig {
    fn default() -> Self {
        Self {
            window: 100,
            margin_ns: 800,
            minimum_ns: 100_000,
            maximum_ns: 2_000_000_000,
            relative_threshold: 0.05,
        }
    }
}

/// Shared read handle onto the current timebase.
#[derive(Clone, Default)]
pub struct TimebaseHandle {
    current_ns: Arc<AtomicU64>,
}

impl TimebaseHandle {
    pub fn get(&self) -> u64 {
        self.current_ns.load(Ordering::Relaxed)
    }

    fn set(&self, value: u64) {
        self.current_ns.store(value, Ordering::Relaxed);
    }
}

/// Retunes the coincidence window from observed event spans.
pub struct TimebaseSupervisor {
    spans: RingBuffer<f64>,
    published_ns: u64,
    handle: TimebaseHandle,
    cfg: TimebaseConfig,
}

impl TimebaseSupervisor {
    pub fn new(cfg: TimebaseConfig) -> Self {
        let handle = TimebaseHandle::default();
        let published = cfg.minimum_ns;
        handle.set(published);
        Self {
            spans: RingBuffer::new(cfg.window),
            published_ns: published,
            handle,
            cfg,
        }
    }

    /// Read handle for other components.
    pub fn handle(&self) -> TimebaseHandle {
        self.handle.clone()
    }

    /// The currently effective coincidence window, ns.
    pub fn window_ns(&self) -> u64 {
        self.published_ns
    }

    /// Records the span of a finalized event and republishes the timebase
    /// when it moved by more than the relative threshold.
    pub fn sample(&mut self, sample: TimebaseSample) {
        let span = (sample.end_ns - sample.start_ns).max(0) as f64;
        self.spans.push(span);

        let candidate = (self.spans.max().unwrap_or(0.0) as u64)
            .saturating_add(self.cfg.margin_ns)
            .clamp(self.cfg.minimum_ns, self.cfg.maximum_ns);

        let change =
            (candidate as f64 - self.published_ns as f64).abs() / self.published_ns as f64;
        if change > self.cfg.relative_threshold {
            self.published_ns = candidate;
            self.handle.set(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(span_ns: i64) -> TimebaseSample {
        TimebaseSample {
            start_ns: 0,
            end_ns: span_ns,
        }
    }

    fn config() -> TimebaseConfig {
        TimebaseConfig {
            window: 4,
            margin_ns: 100,
            minimum_ns: 1_000,
            maximum_ns: 1_000_000,
            relative_threshold: 0.05,
        }
    }

    #[test]
    fn test_starts_at_minimum() {
        let supervisor = TimebaseSupervisor::new(config());
        assert_eq!(supervisor.window_ns(), 1_000);
        assert_eq!(supervisor.handle().get(), 1_000);
    }

    #[test]
    fn test_grows_with_observed_spans() {
        let mut supervisor = TimebaseSupervisor::new(config());
        supervisor.sample(sample(50_000));
        assert_eq!(supervisor.window_ns(), 50_100);
        assert_eq!(supervisor.handle().get(), 50_100);
    }

    #[test]
    fn test_small_changes_are_not_published() {
        let mut supervisor = TimebaseSupervisor::new(config());
        supervisor.sample(sample(50_000));
        let published = supervisor.window_ns();

        // A 2 % larger span stays below the 5 % publish threshold.
        supervisor.sample(sample(51_000));
        assert_eq!(supervisor.window_ns(), published);
    }

    #[test]
    fn test_shrinks_when_large_spans_age_out() {
        let mut supervisor = TimebaseSupervisor::new(config());
        supervisor.sample(sample(80_000));
        assert_eq!(supervisor.window_ns(), 80_100);

        // Window holds 4 samples; push the large one out.
        for _ in 0..4 {
            supervisor.sample(sample(10_000));
        }
        assert_eq!(supervisor.window_ns(), 10_100);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let mut supervisor = TimebaseSupervisor::new(config());
        supervisor.sample(sample(100_000_000));
        assert_eq!(supervisor.window_ns(), 1_000_000);

        let mut low = TimebaseSupervisor::new(config());
        low.sample(sample(10));
        assert_eq!(low.window_ns(), 1_000);
    }
}
