//! Registry of active detector stations.
//!
//! The supervisor owns all per-station state. Incoming detector info
//! creates or relocates registry records; incoming raw hits are routed
//! through the owning station's sanity gate and, when accepted, promoted
//! and forwarded to the coincidence filter and the pair analyzer. A
//! periodic sweep emits summaries, drives the trigger state machines and
//! removes stations that have gone offline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

use crate::analysis::{DetectorStation, PairEvent, StationConfig};
use crate::messages::{
    DetectorInfo, DetectorSummary, DetectorTrigger, Hit, Location, RawHit, StationStatus,
    TriggerLevel, UserInfo,
};
use crate::pipeline::{Sink, Stage};
use crate::supervision::ClusterMetrics;

/// Input vocabulary of the supervisor's worker. The service registers one
/// sink capability per variant on top of the same queue.
#[derive(Debug, Clone)]
pub enum StationMessage {
    Hit(RawHit),
    Info(DetectorInfo),
}

#[derive(Debug, Clone)]
pub struct StationSupervisorConfig {
    /// Cadence of summary emission and the deletion sweep.
    pub summary_interval: std::time::Duration,
    pub station: StationConfig,
}

impl Default for StationSupervisorConfig {
    fn default() -> Self {
        Self {
            summary_interval: std::time::Duration::from_secs(30),
            station: StationConfig::default(),
        }
    }
}

/// Shared read-only view of the registered stations.
///
/// The supervisor is the only writer; readers get copies.
#[derive(Clone, Default)]
pub struct StationDirectory {
    inner: Arc<Mutex<HashMap<u64, (UserInfo, Location)>>>,
}

impl StationDirectory {
    pub fn get_stations(&self) -> Vec<(UserInfo, Location)> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    pub fn get_station(&self, hash: u64) -> Option<(UserInfo, Location)> {
        self.inner.lock().unwrap().get(&hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, hash: u64, user: UserInfo, location: Location) {
        self.inner.lock().unwrap().insert(hash, (user, location));
    }

    fn remove(&self, hash: u64) {
        self.inner.lock().unwrap().remove(&hash);
    }
}

pub struct StationSupervisor {
    stations: HashMap<u64, DetectorStation>,
    delete_queue: VecDeque<u64>,
    unknown_logged: HashSet<u64>,
    directory: StationDirectory,
    hit_sink: Arc<dyn Sink<Hit>>,
    pair_sink: Arc<dyn Sink<PairEvent>>,
    summary_sink: Arc<dyn Sink<DetectorSummary>>,
    trigger_sink: Arc<dyn Sink<DetectorTrigger>>,
    metrics: Arc<ClusterMetrics>,
    cfg: StationSupervisorConfig,
    last_summary: Instant,
}

impl StationSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: StationDirectory,
        hit_sink: Arc<dyn Sink<Hit>>,
        pair_sink: Arc<dyn Sink<PairEvent>>,
        summary_sink: Arc<dyn Sink<DetectorSummary>>,
        trigger_sink: Arc<dyn Sink<DetectorTrigger>>,
        metrics: Arc<ClusterMetrics>,
        cfg: StationSupervisorConfig,
    ) -> Self {
        metrics.set_timeout(cfg.summary_interval);
        Self {
            stations: HashMap::new(),
            delete_queue: VecDeque::new(),
            unknown_logged: HashSet::new(),
            directory,
            hit_sink,
            pair_sink,
            summary_sink,
            trigger_sink,
            metrics,
            cfg,
            last_summary: Instant::now(),
        }
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    fn register(&mut self, info: DetectorInfo, now: Instant) {
        let hash = info.user.station_hash();
        if let Some(station) = self.stations.get_mut(&hash) {
            station.set_location(info.location);
            self.directory.insert(hash, info.user, info.location);
            return;
        }

        info!(station = %info.user.display_name(), "new detector station registered");
        self.stations.insert(
            hash,
            DetectorStation::new(
                info.user.clone(),
                info.location,
                self.cfg.station.clone(),
                now,
            ),
        );
        self.directory
            .insert(hash, info.user.clone(), info.location);
        self.metrics.detector_status(hash, StationStatus::Offline);
        self.unknown_logged.remove(&hash);
        self.pair_sink.submit(PairEvent::AddStation {
            user: info.user,
            location: info.location,
        });
    }

    fn route_hit(&mut self, raw: RawHit, now: Instant) {
        let Some(station) = self.stations.get_mut(&raw.station) else {
            // Unknown station: drop the hit and wait for its registration
            // to arrive on the log topic.
            if self.unknown_logged.insert(raw.station) {
                debug!(hash = raw.station, "hit from unregistered station dropped");
            }
            return;
        };

        let accepted = station.process(&raw, now);
        let transition = station.step(now);
        let user = station.user().clone();
        let location = station.location();

        if let Some((from, to)) = transition {
            Self::emit_transition(
                &self.trigger_sink,
                &self.pair_sink,
                &self.metrics,
                &mut self.delete_queue,
                &user,
                raw.station,
                from,
                to,
            );
        }

        if accepted {
            self.pair_sink.submit(PairEvent::Hit {
                station: raw.station,
                start_ns: raw.start_ns,
            });
            self.hit_sink.submit(Hit::from_raw(raw, user, location));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_transition(
        trigger_sink: &Arc<dyn Sink<DetectorTrigger>>,
        pair_sink: &Arc<dyn Sink<PairEvent>>,
        metrics: &Arc<ClusterMetrics>,
        delete_queue: &mut VecDeque<u64>,
        user: &UserInfo,
        hash: u64,
        from: StationStatus,
        to: StationStatus,
    ) {
        metrics.detector_status(hash, to);
        pair_sink.submit(PairEvent::Status {
            station: hash,
            status: to,
        });
        if let Some(level) = TriggerLevel::from_transition(from, to) {
            info!(
                station = %user.display_name(),
                level = level.as_str(),
                "trigger transition"
            );
            trigger_sink.submit(DetectorTrigger {
                user: user.clone(),
                level,
            });
        }
        if to == StationStatus::Offline {
            delete_queue.push_back(hash);
        }
    }

    /// Handles one queued message. Exposed with an explicit clock for
    /// deterministic tests; the `Stage` impl passes the wall clock.
    pub fn handle(&mut self, message: StationMessage, now: Instant) {
        match message {
            StationMessage::Hit(raw) => self.route_hit(raw, now),
            StationMessage::Info(info) => self.register(info, now),
        }
    }

    /// Advances every trigger state machine and, once per summary
    /// interval, deletes swept-out stations and emits summaries.
    ///
    /// Stations enqueued for deletion are removed at the *next* interval
    /// sweep, so their offline trigger and final summary always go out
    /// before the record disappears.
    pub fn sweep(&mut self, now: Instant) {
        let interval_due = now.duration_since(self.last_summary) >= self.cfg.summary_interval;
        if interval_due {
            self.last_summary = now;
            while let Some(hash) = self.delete_queue.pop_front() {
                if let Some(station) = self.stations.get(&hash) {
                    // A station that came back online stays.
                    if station.status() != StationStatus::Offline {
                        continue;
                    }
                    info!(station = %station.user().display_name(), "removing offline station");
                }
                self.stations.remove(&hash);
                self.directory.remove(hash);
                self.metrics.remove_detector(hash);
            }
        }

        let mut transitions = Vec::new();
        for (&hash, station) in self.stations.iter_mut() {
            if let Some((from, to)) = station.step(now) {
                transitions.push((station.user().clone(), hash, from, to));
            }
        }
        for (user, hash, from, to) in transitions {
            Self::emit_transition(
                &self.trigger_sink,
                &self.pair_sink,
                &self.metrics,
                &mut self.delete_queue,
                &user,
                hash,
                from,
                to,
            );
        }

        if interval_due {
            for station in self.stations.values_mut() {
                self.summary_sink.submit(station.summary());
            }
        }
    }
}

impl Stage for StationSupervisor {
    type Input = StationMessage;

    fn process(&mut self, message: StationMessage) {
        self.handle(message, Instant::now());
    }

    fn tick(&mut self) {
        self.sweep(Instant::now());
    }
}
