//! Periodic per-station summaries.

use serde::{Deserialize, Serialize};

use super::hit::UserInfo;

/// Rate and quality summary for one station, emitted every summary
/// interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSummary {
    pub user: UserInfo,
    /// Mean event rate over the rate meter's window, Hz.
    pub mean_eventrate: f64,
    /// Standard deviation of the bucketed rates, Hz.
    pub stddev_eventrate: f64,
    /// Mean reported timing accuracy, nanoseconds.
    pub mean_time_acc: f64,
    /// Mean pulse length, nanoseconds.
    pub mean_pulselength: f64,
    /// Hardware counter increments per received hit since the last
    /// summary; 1.0 when no hits were lost on the station side.
    pub ublox_counter_progress: f64,
    /// Hits received since the last summary.
    pub incoming: u64,
    /// Fraction of incoming hits rejected by the sanity gate.
    pub deadtime_factor: f64,
}
