//! Bucketed event-rate measurement.

use std::time::{Duration, Instant};

use super::ring_buffer::RingBuffer;

/// Rolling event rate over `buckets` intervals of `bucket_length` each.
///
/// Counts are accumulated into the current bucket; [`RateMeter::step`]
/// closes the bucket once its interval has elapsed and derives the rate
/// statistics from the closed buckets. Time is passed in explicitly so the
/// meter stays deterministic under test.
#[derive(Debug, Clone)]
pub struct RateMeter {
    history: RingBuffer<f64>,
    bucket_length: Duration,
    current_n: u64,
    current: f64,
    last: Instant,
}

impl RateMeter {
    pub fn new(buckets: usize, bucket_length: Duration, now: Instant) -> Self {
        Self {
            history: RingBuffer::new(buckets),
            bucket_length,
            current_n: 0,
            current: 0.0,
            last: now,
        }
    }

    /// Records one event in the current bucket.
    pub fn increment(&mut self) {
        self.current_n += 1;
    }

    /// Closes elapsed buckets. Returns true if at least one bucket was
    /// closed in this step.
    ///
    /// When more than one bucket interval has passed (quiet station), the
    /// intermediate buckets are recorded as empty so the mean decays.
    pub fn step(&mut self, now: Instant) -> bool {
        let mut stepped = false;
        while now.duration_since(self.last) >= self.bucket_length {
            self.current = self.current_n as f64 / self.bucket_length.as_secs_f64();
            self.history.push(self.current);
            self.current_n = 0;
            self.last += self.bucket_length;
            stepped = true;
        }
        stepped
    }

    /// Rate of the most recently closed bucket, Hz.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Mean rate over the closed buckets, Hz.
    pub fn mean(&self) -> f64 {
        self.history.mean()
    }

    pub fn variance(&self) -> f64 {
        self.history.variance()
    }

    pub fn deviation(&self) -> f64 {
        self.history.stddev()
    }

    /// True once every bucket in the window has been closed at least once.
    pub fn full(&self) -> bool {
        self.history.len() == self.history.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_uniform_rate_converges() {
        // 100 ticks over 10 seconds, 10 buckets of 1000 ms: mean 10 Hz,
        // stddev 0.
        let start = Instant::now();
        let mut meter = RateMeter::new(10, Duration::from_millis(1000), start);

        for tick in 0..100 {
            let t = start + Duration::from_millis(tick * 100);
            meter.step(t);
            meter.increment();
        }
        meter.step(start + Duration::from_secs(10));

        assert!(meter.full());
        assert_abs_diff_eq!(meter.mean(), 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(meter.deviation(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(meter.current(), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quiet_gaps_decay_the_mean() {
        let start = Instant::now();
        let mut meter = RateMeter::new(4, Duration::from_secs(1), start);

        for _ in 0..8 {
            meter.increment();
        }
        // One active second, then three silent ones.
        meter.step(start + Duration::from_secs(4));

        assert_abs_diff_eq!(meter.mean(), 2.0, epsilon = 1e-12);
        assert_eq!(meter.current(), 0.0);
    }

    #[test]
    fn test_no_step_before_interval() {
        let start = Instant::now();
        let mut meter = RateMeter::new(4, Duration::from_secs(1), start);
        meter.increment();
        assert!(!meter.step(start + Duration::from_millis(900)));
        assert_eq!(meter.mean(), 0.0);
    }
}
