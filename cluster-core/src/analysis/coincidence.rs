//! Sliding-window temporal cluster builder.
//!
//! Hits from distinct stations arriving within the adaptive coincidence
//! window W are grouped into combined events. The filter keeps an ordered
//! sequence of in-flight events; once an event's end falls behind the
//! retention horizon R = 2·W it is finalized: combined events (n ≥ 2) are
//! emitted downstream and feed the timebase controller, single-hit events
//! are dropped.
//!
//! All mutation happens on the filter's own worker thread; between hits
//! the worker's tick advances finalization by wall clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

use crate::messages::{Event, Hit};
use crate::pipeline::{Sink, Stage};
use crate::supervision::{ClusterMetrics, TimebaseConfig, TimebaseSupervisor};

#[derive(Debug, Clone, Default)]
pub struct CoincidenceConfig {
    pub timebase: TimebaseConfig,
}

/// The cluster builder. See the module docs for the algorithm.
pub struct CoincidenceFilter {
    /// In-flight events, ordered by start time.
    events: VecDeque<Event>,
    timebase: TimebaseSupervisor,
    event_sink: Arc<dyn Sink<Event>>,
    metrics: Arc<ClusterMetrics>,
    /// Newest observed hit time and when it was observed, to extrapolate
    /// "now" in detector time while no hits arrive.
    clock: Option<(i64, Instant)>,
}

impl CoincidenceFilter {
    pub fn new(
        event_sink: Arc<dyn Sink<Event>>,
        metrics: Arc<ClusterMetrics>,
        cfg: CoincidenceConfig,
    ) -> Self {
        Self {
            events: VecDeque::new(),
            timebase: TimebaseSupervisor::new(cfg.timebase),
            event_sink,
            metrics,
            clock: None,
        }
    }

    pub fn timebase(&self) -> &TimebaseSupervisor {
        &self.timebase
    }

    pub fn in_flight(&self) -> usize {
        self.events.len()
    }

    /// The current position on the detector time axis.
    fn now_ns(&self) -> Option<i64> {
        self.clock
            .map(|(latest, at)| latest.saturating_add(at.elapsed().as_nanos() as i64))
    }

    /// Inserts one hit into the in-flight sequence.
    ///
    /// Candidates are events that do not yet contain the hit's station and
    /// whose span would stay within W after absorbing it; among those the
    /// one whose center is nearest the hit wins, earliest start breaking
    /// ties. Without a candidate the hit founds a new single-hit event.
    fn insert(&mut self, hit: Hit) {
        let window = self.timebase.window_ns() as i64;

        let mut best: Option<(usize, i64)> = None;
        for (index, event) in self.events.iter().enumerate() {
            if event.start_ns() > hit.start_ns + window {
                break;
            }
            if event.contains_station(hit.station) || event.span_with(hit.start_ns) > window {
                continue;
            }
            let distance = (event.center_ns() - hit.start_ns).abs();
            // Strict comparison keeps the earliest start on ties.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }

        match best {
            Some((index, _)) => {
                let mut event = self.events.remove(index).expect("candidate index valid");
                event.add(hit);
                self.insert_sorted(event);
            }
            None => self.insert_sorted(Event::from_hit(hit)),
        }
    }

    fn insert_sorted(&mut self, event: Event) {
        let position = self
            .events
            .partition_point(|e| e.start_ns() <= event.start_ns());
        self.events.insert(position, event);
    }

    /// Finalizes events whose end has fallen behind the retention horizon
    /// R = 2·W relative to `now_ns`.
    pub fn finalize(&mut self, now_ns: i64) {
        let retention = 2 * self.timebase.window_ns() as i64;
        while let Some(front) = self.events.front() {
            if front.end_ns() >= now_ns - retention {
                break;
            }
            let event = self.events.pop_front().expect("front exists");
            self.emit(event);
        }
    }

    fn emit(&mut self, event: Event) {
        if event.n() >= 2 {
            trace!(
                n = event.n(),
                span_ns = event.span_ns(),
                "emitting combined event"
            );
            self.timebase.sample(event.timebase_sample());
            self.metrics.record_outgoing(event.n());
            self.event_sink.submit(event);
        }
        // Single-hit events are not forwarded.
    }
}

impl Stage for CoincidenceFilter {
    type Input = Hit;

    fn process(&mut self, hit: Hit) {
        self.metrics.record_incoming();

        let advanced = self
            .clock
            .map_or(true, |(latest, _)| hit.start_ns > latest);
        if advanced {
            self.clock = Some((hit.start_ns, Instant::now()));
        }

        self.insert(hit);
        if let Some(now) = self.now_ns() {
            self.finalize(now);
        }
    }

    fn tick(&mut self) {
        if let Some(now) = self.now_ns() {
            self.finalize(now);
        }
    }

    fn post_run(&mut self) {
        // Shutdown: flush everything still in flight.
        while let Some(event) = self.events.pop_front() {
            self.emit(event);
        }
    }
}
