//! Events: one hit, or several hits from distinct stations within a
//! coincidence window.

use super::hit::Hit;

/// A timing sample fed back to the timebase supervisor when an event is
/// finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimebaseSample {
    pub start_ns: i64,
    pub end_ns: i64,
}

/// A single-hit or combined event.
///
/// The event id is derived from the founding hit and stays stable while
/// further hits join, so downstream consumers can correlate emissions.
/// All contained hits are from pairwise distinct stations; the coincidence
/// filter enforces this before adding a hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: u64,
    start_ns: i64,
    end_ns: i64,
    hits: Vec<Hit>,
}

impl Event {
    pub fn from_hit(hit: Hit) -> Self {
        let id = hit.station ^ (hit.start_ns as u64).rotate_left(32);
        Self {
            id,
            start_ns: hit.start_ns,
            end_ns: hit.start_ns,
            hits: vec![hit],
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Earliest hit timestamp, nanoseconds.
    pub fn start_ns(&self) -> i64 {
        self.start_ns
    }

    /// Latest hit timestamp, nanoseconds.
    pub fn end_ns(&self) -> i64 {
        self.end_ns
    }

    /// Total time span of the event.
    pub fn span_ns(&self) -> i64 {
        self.end_ns - self.start_ns
    }

    /// Multiplicity: the number of distinct contributing stations.
    pub fn n(&self) -> usize {
        self.hits.len()
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn into_hits(self) -> Vec<Hit> {
        self.hits
    }

    pub fn contains_station(&self, station: u64) -> bool {
        self.hits.iter().any(|h| h.station == station)
    }

    /// Midpoint of the event's span, used for nearest-candidate selection.
    pub fn center_ns(&self) -> i64 {
        self.start_ns + (self.end_ns - self.start_ns) / 2
    }

    /// Span the event would have after absorbing a hit at `start_ns`.
    pub fn span_with(&self, start_ns: i64) -> i64 {
        self.end_ns.max(start_ns) - self.start_ns.min(start_ns)
    }

    /// Adds a hit. The caller must have checked that the station is not
    /// already contained.
    pub fn add(&mut self, hit: Hit) {
        debug_assert!(!self.contains_station(hit.station));
        self.start_ns = self.start_ns.min(hit.start_ns);
        self.end_ns = self.end_ns.max(hit.start_ns);
        self.hits.push(hit);
    }

    pub fn timebase_sample(&self) -> TimebaseSample {
        TimebaseSample {
            start_ns: self.start_ns,
            end_ns: self.end_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Location, UserInfo};

    fn hit(station: u64, start_ns: i64) -> Hit {
        Hit {
            station,
            user: UserInfo::new("user", format!("s{station}")),
            location: Location::default(),
            start_ns,
            duration_ns: 120,
            time_acc_ns: 25.0,
            ublox_counter: 0,
            gnss_time_grid: 0,
            fix: true,
            utc: false,
        }
    }

    #[test]
    fn test_single_hit_event() {
        let event = Event::from_hit(hit(1, 1000));
        assert_eq!(event.n(), 1);
        assert_eq!(event.start_ns(), 1000);
        assert_eq!(event.end_ns(), 1000);
        assert_eq!(event.span_ns(), 0);
        assert!(event.contains_station(1));
    }

    #[test]
    fn test_add_extends_span_and_keeps_id() {
        let mut event = Event::from_hit(hit(1, 1000));
        let id = event.id();

        event.add(hit(2, 400));
        event.add(hit(3, 1600));

        assert_eq!(event.id(), id);
        assert_eq!(event.n(), 3);
        assert_eq!(event.start_ns(), 400);
        assert_eq!(event.end_ns(), 1600);
        assert_eq!(event.center_ns(), 1000);
    }

    #[test]
    fn test_span_with_prospective_hit() {
        let mut event = Event::from_hit(hit(1, 0));
        event.add(hit(2, 3000));

        assert_eq!(event.span_with(1500), 3000);
        assert_eq!(event.span_with(-2000), 5000);
        assert_eq!(event.span_with(9000), 9000);
    }
}
