//! End-to-end pipeline test: detector info and raw hits in, combined
//! events and a persisted pair store out, across real worker threads.

use cluster_core::analysis::{
    CoincidenceConfig, CoincidenceFilter, PairEvent, PairHistograms, PairHistogramsConfig,
};
use cluster_core::supervision::{
    ClusterMetrics, StationDirectory, StationMessage, StationSupervisor, StationSupervisorConfig,
    TimebaseConfig,
};
use cluster_core::{
    DetectorInfo, DetectorSummary, DetectorTrigger, Event, Location, RawHit, ShutdownToken, Sink,
    ThreadedSink, UserInfo,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

struct Capture<T>(Mutex<Vec<T>>);

impl<T> Capture<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn take(&self) -> Vec<T> {
        std::mem::take(&mut self.0.lock().unwrap())
    }
}

impl<T: Send> Sink<T> for Capture<T> {
    fn submit(&self, item: T) {
        self.0.lock().unwrap().push(item);
    }
}

fn location() -> Location {
    Location {
        lat: 48.0,
        lon: 11.0,
        alt: 500.0,
        h_acc: 4.0,
        v_acc: 8.0,
        dop: 1.0,
    }
}

fn info(name: &str) -> DetectorInfo {
    DetectorInfo {
        user: UserInfo::new(name, "01"),
        location: location(),
    }
}

fn raw(station: u64, counter: u16, start_ns: i64) -> RawHit {
    RawHit {
        station,
        start_ns,
        duration_ns: 120,
        time_acc_ns: 25.0,
        ublox_counter: counter,
        gnss_time_grid: 1,
        fix: true,
        utc: false,
    }
}

#[test]
fn test_hits_become_combined_events_across_threads() {
    let stop = ShutdownToken::new();
    let metrics = ClusterMetrics::new();
    let data_dir = TempDir::new().unwrap();

    let events = Capture::<Event>::new();
    let summaries = Capture::<DetectorSummary>::new();
    let triggers = Capture::<DetectorTrigger>::new();

    // Coincidence filter with a pinned 10 µs window.
    let filter = CoincidenceFilter::new(
        events.clone(),
        metrics.clone(),
        CoincidenceConfig {
            timebase: TimebaseConfig {
                minimum_ns: 10_000,
                maximum_ns: 10_000,
                ..Default::default()
            },
        },
    );
    let (hit_sink, filter_worker) =
        ThreadedSink::spawn("coincidence", Duration::from_millis(20), stop.clone(), filter);

    let analyzer = PairHistograms::new(PairHistogramsConfig {
        data_directory: data_dir.path().to_path_buf(),
        ..Default::default()
    });
    let (pair_sink, analyzer_worker) = ThreadedSink::spawn(
        "station_coincidence",
        Duration::from_millis(20),
        stop.clone(),
        analyzer,
    );

    let directory = StationDirectory::default();
    let supervisor = StationSupervisor::new(
        directory.clone(),
        hit_sink.clone() as Arc<dyn Sink<_>>,
        pair_sink.clone() as Arc<dyn Sink<PairEvent>>,
        summaries.clone(),
        triggers.clone(),
        metrics.clone(),
        StationSupervisorConfig::default(),
    );
    let (station_sink, station_worker) = ThreadedSink::spawn(
        "station_supervisor",
        Duration::from_millis(20),
        stop.clone(),
        supervisor,
    );

    let alice = info("alice");
    let bob = info("bob");
    let carol = info("carol");
    let alice_hash = alice.user.station_hash();
    let bob_hash = bob.user.station_hash();
    let carol_hash = carol.user.station_hash();

    station_sink.submit(StationMessage::Info(alice));
    station_sink.submit(StationMessage::Info(bob));
    station_sink.submit(StationMessage::Info(carol));

    // Two hits 500 ns apart, then a late hit that pushes the filter's
    // clock far past the retention horizon.
    station_sink.submit(StationMessage::Hit(raw(alice_hash, 1, 0)));
    station_sink.submit(StationMessage::Hit(raw(bob_hash, 1, 500)));
    station_sink.submit(StationMessage::Hit(raw(carol_hash, 1, 10_000_000)));

    std::thread::sleep(Duration::from_millis(300));

    let emitted = events.take();
    assert_eq!(emitted.len(), 1, "expected exactly one combined event");
    let event = &emitted[0];
    assert_eq!(event.n(), 2);
    assert_eq!(event.start_ns(), 0);
    assert_eq!(event.end_ns(), 500);
    assert!(event.contains_station(alice_hash));
    assert!(event.contains_station(bob_hash));
    // Hits arrive enriched with the registered identity.
    assert!(event
        .hits()
        .iter()
        .any(|h| h.user.username == "alice" && h.location.lat == 48.0));

    // All three stations went online.
    let online: Vec<_> = triggers.take();
    assert_eq!(online.len(), 3);

    assert_eq!(directory.len(), 3);
    assert!(directory.get_station(alice_hash).is_some());

    stop.cancel();
    station_worker.join();
    filter_worker.join();
    analyzer_worker.join();

    // The analyzer wrote its dump during post_run.
    assert!(data_dir.path().join("station_coincidence.dat").exists());

    // The carol hit stayed single and was dropped, not emitted.
    assert!(events.take().iter().all(|e| e.n() >= 2));
}
