//! Process-wide telemetry collection and cluster-log emission.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};

use crate::messages::{ClusterLog, StationStatus};
use crate::pipeline::{QueueProbe, Sink};
use crate::supervision::TimebaseHandle;

/// Counters shared with the pipeline components.
///
/// Writers are the station supervisor (detector states) and the coincidence
/// filter (incoming/outgoing); the state supervisor reads a consistent
/// enough snapshot once per emission interval.
pub struct ClusterMetrics {
    incoming: AtomicU64,
    outgoing: Mutex<BTreeMap<usize, u64>>,
    maximum_n: AtomicUsize,
    detectors: Mutex<HashMap<u64, StationStatus>>,
    queues: Mutex<Vec<QueueProbe>>,
    timeout_ms: AtomicU64,
    started: Instant,
}

impl ClusterMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            incoming: AtomicU64::new(0),
            outgoing: Mutex::new(BTreeMap::new()),
            maximum_n: AtomicUsize::new(0),
            detectors: Mutex::new(HashMap::new()),
            queues: Mutex::new(Vec::new()),
            timeout_ms: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    pub fn record_incoming(&self) {
        self.incoming.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outgoing(&self, multiplicity: usize) {
        *self
            .outgoing
            .lock()
            .unwrap()
            .entry(multiplicity)
            .or_insert(0) += 1;
        self.maximum_n.fetch_max(multiplicity, Ordering::Relaxed);
    }

    pub fn detector_status(&self, hash: u64, status: StationStatus) {
        self.detectors.lock().unwrap().insert(hash, status);
    }

    pub fn remove_detector(&self, hash: u64) {
        self.detectors.lock().unwrap().remove(&hash);
    }

    pub fn register_queue(&self, probe: QueueProbe) {
        self.queues.lock().unwrap().push(probe);
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn incoming(&self) -> u64 {
        self.incoming.load(Ordering::Relaxed)
    }

    pub fn outgoing_total(&self) -> u64 {
        self.outgoing.lock().unwrap().values().sum()
    }
}

/// Samples system load and the shared counters, emitting one
/// [`ClusterLog`] per step. Owns no pipeline data.
pub struct StateSupervisor {
    metrics: Arc<ClusterMetrics>,
    timebase: TimebaseHandle,
    sink: Arc<dyn Sink<ClusterLog>>,
    system: System,
    pid: Pid,
    last_step: Instant,
    last_incoming: u64,
    last_outgoing: u64,
}

impl StateSupervisor {
    pub fn new(
        metrics: Arc<ClusterMetrics>,
        timebase: TimebaseHandle,
        sink: Arc<dyn Sink<ClusterLog>>,
    ) -> Self {
        Self {
            metrics,
            timebase,
            sink,
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            last_step: Instant::now(),
            last_incoming: 0,
            last_outgoing: 0,
        }
    }

    /// Builds and emits one cluster log entry.
    pub fn step(&mut self) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.system.refresh_process(self.pid);

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_step).as_secs_f64().max(1e-9);
        self.last_step = now;

        let incoming = self.metrics.incoming();
        let outgoing = self.metrics.outgoing_total();
        let frequency_in = (incoming - self.last_incoming) as f64 / elapsed;
        let frequency_l1_out = (outgoing - self.last_outgoing) as f64 / elapsed;
        self.last_incoming = incoming;
        self.last_outgoing = outgoing;

        let queues: BTreeMap<String, usize> = self
            .metrics
            .queues
            .lock()
            .unwrap()
            .iter()
            .map(|probe| (probe.name().to_string(), probe.len()))
            .collect();
        let buffer_length = queues.values().sum();

        let (total_detectors, reliable_detectors) = {
            let detectors = self.metrics.detectors.lock().unwrap();
            let online = detectors.values().filter(|s| s.is_online()).count();
            let reliable = detectors
                .values()
                .filter(|s| **s == StationStatus::Reliable)
                .count();
            (online, reliable)
        };

        let (process_cpu_load, memory_usage) = self
            .system
            .process(self.pid)
            .map(|p| (f64::from(p.cpu_usage()), p.memory()))
            .unwrap_or((0.0, 0));

        let log = ClusterLog {
            timeout_ms: self.metrics.timeout_ms.load(Ordering::Relaxed),
            timebase_ns: self.timebase.get(),
            uptime_s: self.metrics.started.elapsed().as_secs(),
            frequency_in,
            frequency_l1_out,
            buffer_length,
            queues,
            total_detectors,
            reliable_detectors,
            maximum_n: self.metrics.maximum_n.load(Ordering::Relaxed),
            system_cpu_load: f64::from(self.system.global_cpu_info().cpu_usage()),
            process_cpu_load,
            memory_usage,
            incoming,
            outgoing: self.metrics.outgoing.lock().unwrap().clone(),
        };
        self.sink.submit(log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Capture(Mutex<Vec<ClusterLog>>);

    impl Sink<ClusterLog> for Capture {
        fn submit(&self, log: ClusterLog) {
            self.0.lock().unwrap().push(log);
        }
    }

    #[test]
    fn test_counters_flow_into_cluster_log() {
        let metrics = ClusterMetrics::new();
        metrics.set_timeout(Duration::from_secs(30));
        for _ in 0..10 {
            metrics.record_incoming();
        }
        metrics.record_outgoing(2);
        metrics.record_outgoing(2);
        metrics.record_outgoing(3);
        metrics.detector_status(1, StationStatus::Reliable);
        metrics.detector_status(2, StationStatus::Unreliable);
        metrics.detector_status(3, StationStatus::Offline);

        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut supervisor = StateSupervisor::new(
            metrics.clone(),
            TimebaseHandle::default(),
            capture.clone(),
        );
        supervisor.step();

        let logs = capture.0.lock().unwrap();
        let log = logs.last().expect("no cluster log emitted");
        assert_eq!(log.incoming, 10);
        assert_eq!(log.outgoing.get(&2), Some(&2));
        assert_eq!(log.outgoing.get(&3), Some(&1));
        assert_eq!(log.maximum_n, 3);
        assert_eq!(log.total_detectors, 2);
        assert_eq!(log.reliable_detectors, 1);
        assert_eq!(log.timeout_ms, 30_000);
    }

    #[test]
    fn test_detector_removal() {
        let metrics = ClusterMetrics::new();
        metrics.detector_status(1, StationStatus::Reliable);
        metrics.remove_detector(1);
        assert!(metrics.detectors.lock().unwrap().is_empty());
    }
}
