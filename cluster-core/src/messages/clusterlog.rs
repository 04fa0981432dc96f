//! Process-wide telemetry emitted at a fixed cadence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of the cluster service's health, published on the cluster
/// topic and written to the time-series database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLog {
    /// Station summary interval, milliseconds.
    pub timeout_ms: u64,
    /// Current coincidence timebase, nanoseconds.
    pub timebase_ns: u64,
    /// Service uptime, seconds.
    pub uptime_s: u64,
    /// Incoming single-hit rate, Hz.
    pub frequency_in: f64,
    /// Outgoing combined-event rate, Hz.
    pub frequency_l1_out: f64,
    /// Total backlog over all threaded sink queues.
    pub buffer_length: usize,
    /// Per-queue backlog, keyed by worker name.
    pub queues: BTreeMap<String, usize>,
    pub total_detectors: usize,
    pub reliable_detectors: usize,
    /// Largest multiplicity observed since startup.
    pub maximum_n: usize,
    pub system_cpu_load: f64,
    pub process_cpu_load: f64,
    /// Resident memory of the process, bytes.
    pub memory_usage: u64,
    /// Total hits received since startup.
    pub incoming: u64,
    /// Events emitted since startup, by multiplicity.
    pub outgoing: BTreeMap<usize, u64>,
}
