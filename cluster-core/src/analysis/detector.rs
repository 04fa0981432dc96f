//! Per-station bookkeeping and the trigger state machine.

use std::time::{Duration, Instant};
use tracing::debug;

use super::rate_meter::RateMeter;
use super::ring_buffer::RingBuffer;
use crate::messages::{DetectorSummary, Location, RawHit, StationStatus, UserInfo};

/// Tuning for one detector station's meters and trigger behavior.
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// No hit for this long marks the station offline.
    pub inactivity_timeout: Duration,
    /// Minimum mean/stddev ratio of the event rate to count as stable.
    pub stability_ratio: f64,
    /// Stability must hold this long before the station becomes reliable.
    pub stability_hysteresis: Duration,
    /// Sample window for the accuracy and pulse-length rings.
    pub ring_size: usize,
    /// Rate meter shape.
    pub rate_buckets: usize,
    pub rate_bucket_length: Duration,
    /// Largest plausible hardware-counter step between consecutive hits.
    pub max_counter_step: u16,
    /// Largest plausible pulse length, nanoseconds.
    pub max_pulse_ns: i64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(90),
            stability_ratio: 5.0,
            stability_hysteresis: Duration::from_secs(60),
            ring_size: 100,
            rate_buckets: 60,
            rate_bucket_length: Duration::from_secs(2),
            max_counter_step: 10_000,
            max_pulse_ns: 1_000_000,
        }
    }
}

/// State for one registered detector station.
///
/// Owned exclusively by the station supervisor; all methods take explicit
/// time so behavior is reproducible under test.
pub struct DetectorStation {
    user: UserInfo,
    location: Location,
    status: StationStatus,
    last_seen: Instant,
    rate: RateMeter,
    time_acc: RingBuffer<f64>,
    pulse_length: RingBuffer<f64>,
    last_counter: Option<u16>,
    counter_delta: u64,
    counted: u64,
    wraparounds: u64,
    incoming: u64,
    rejected: u64,
    stable_since: Option<Instant>,
    cfg: StationConfig,
}

impl DetectorStation {
    pub fn new(user: UserInfo, location: Location, cfg: StationConfig, now: Instant) -> Self {
        Self {
            user,
            location,
            status: StationStatus::Offline,
            last_seen: now,
            rate: RateMeter::new(cfg.rate_buckets, cfg.rate_bucket_length, now),
            time_acc: RingBuffer::new(cfg.ring_size),
            pulse_length: RingBuffer::new(cfg.ring_size),
            last_counter: None,
            counter_delta: 0,
            counted: 0,
            wraparounds: 0,
            incoming: 0,
            rejected: 0,
            stable_since: None,
            cfg,
        }
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    pub fn status(&self) -> StationStatus {
        self.status
    }

    /// Feeds one hit through the meters and the sanity gate.
    ///
    /// Returns true when the hit passes and may be forwarded: plausible
    /// hardware-counter progress, non-negative pulse length within bounds,
    /// finite timing accuracy and a usable location. Rejected hits still
    /// count toward liveness and the deadtime factor.
    pub fn process(&mut self, hit: &RawHit, now: Instant) -> bool {
        self.incoming += 1;
        self.last_seen = now;

        let counter_ok = match self.last_counter {
            Some(prev) => {
                let delta = hit.ublox_counter.wrapping_sub(prev);
                if hit.ublox_counter < prev {
                    self.wraparounds += 1;
                }
                if delta == 0 || delta > self.cfg.max_counter_step {
                    false
                } else {
                    self.counter_delta += u64::from(delta);
                    self.counted += 1;
                    true
                }
            }
            // First observation establishes the baseline.
            None => true,
        };
        self.last_counter = Some(hit.ublox_counter);

        let accepted = counter_ok
            && hit.duration_ns >= 0
            && hit.duration_ns <= self.cfg.max_pulse_ns
            && hit.time_acc_ns.is_finite()
            && hit.time_acc_ns > 0.0
            && self.has_usable_location();

        if accepted {
            self.rate.increment();
            self.time_acc.push(hit.time_acc_ns);
            self.pulse_length.push(hit.duration_ns as f64);
        } else {
            self.rejected += 1;
            debug!(
                station = %self.user.display_name(),
                "hit rejected by sanity gate"
            );
        }
        accepted
    }

    fn has_usable_location(&self) -> bool {
        self.location.lat.is_finite()
            && self.location.lon.is_finite()
            && self.location.h_acc.is_finite()
    }

    /// Advances the rate meter and evaluates the trigger state machine.
    ///
    /// Returns `Some((from, to))` when the status changed in this step.
    /// Reliability requires a full rate window whose mean/stddev ratio has
    /// exceeded the stability threshold for the configured hysteresis.
    pub fn step(&mut self, now: Instant) -> Option<(StationStatus, StationStatus)> {
        self.rate.step(now);

        let from = self.status;
        let to = if now.duration_since(self.last_seen) > self.cfg.inactivity_timeout {
            StationStatus::Offline
        } else if self.incoming == 0 && from == StationStatus::Offline {
            // Registered but nothing received yet.
            StationStatus::Offline
        } else {
            match (from, self.rate_is_stable()) {
                (StationStatus::Offline, _) => {
                    self.stable_since = None;
                    StationStatus::Unreliable
                }
                (_, true) => {
                    let since = *self.stable_since.get_or_insert(now);
                    if now.duration_since(since) >= self.cfg.stability_hysteresis {
                        StationStatus::Reliable
                    } else {
                        from
                    }
                }
                (_, false) => {
                    self.stable_since = None;
                    StationStatus::Unreliable
                }
            }
        };

        if to == StationStatus::Offline {
            self.stable_since = None;
        }
        if to != from {
            self.status = to;
            Some((from, to))
        } else {
            None
        }
    }

    fn rate_is_stable(&self) -> bool {
        if !self.rate.full() || self.rate.mean() <= 0.0 {
            return false;
        }
        let deviation = self.rate.deviation();
        // A perfectly flat rate has zero deviation and is trivially stable.
        deviation == 0.0 || self.rate.mean() / deviation > self.cfg.stability_ratio
    }

    /// Produces the periodic summary and resets the interval counters.
    pub fn summary(&mut self) -> DetectorSummary {
        let progress = if self.counted > 0 {
            self.counter_delta as f64 / self.counted as f64
        } else {
            0.0
        };
        let deadtime = if self.incoming > 0 {
            self.rejected as f64 / self.incoming as f64
        } else {
            0.0
        };
        let summary = DetectorSummary {
            user: self.user.clone(),
            mean_eventrate: self.rate.mean(),
            stddev_eventrate: self.rate.deviation(),
            mean_time_acc: self.time_acc.mean(),
            mean_pulselength: self.pulse_length.mean(),
            ublox_counter_progress: progress,
            incoming: self.incoming,
            deadtime_factor: deadtime,
        };
        self.incoming = 0;
        self.rejected = 0;
        self.counter_delta = 0;
        self.counted = 0;
        summary
    }

    pub fn seconds_since_seen(&self, now: Instant) -> u64 {
        now.duration_since(self.last_seen).as_secs()
    }

    /// Hardware-counter wraparounds observed since registration.
    pub fn counter_wraparounds(&self) -> u64 {
        self.wraparounds
    }
}
