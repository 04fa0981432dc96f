//! Fixed-width histogram over a signed integer range.

/// Histogram with `bins.len()` equal-width bins spanning `[min, max)`.
///
/// Out-of-range fills clamp into the outermost bins, so both edges of the
/// range remain observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    bins: Vec<u32>,
    min: i64,
    bin_width: i64,
}

impl Histogram {
    /// # Panics
    /// Panics unless `max > min` and the range divides evenly into `bins`.
    pub fn new(bins: usize, min: i64, max: i64) -> Self {
        assert!(bins > 0 && max > min);
        let width = max - min;
        assert!(
            width % bins as i64 == 0,
            "histogram range must divide evenly into bins"
        );
        Self {
            bins: vec![0; bins],
            min,
            bin_width: width / bins as i64,
        }
    }

    pub fn bin_index(&self, value: i64) -> usize {
        let offset = (value - self.min) / self.bin_width;
        offset.clamp(0, self.bins.len() as i64 - 1) as usize
    }

    pub fn fill(&mut self, value: i64) {
        let index = self.bin_index(value);
        self.bins[index] = self.bins[index].saturating_add(1);
    }

    pub fn bins(&self) -> &[u32] {
        &self.bins
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_width(&self) -> i64 {
        self.bin_width
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().map(|&b| u64::from(b)).sum()
    }

    /// Restores bin contents from a persisted dump.
    ///
    /// Returns false (leaving the histogram untouched) when the count does
    /// not match.
    pub fn restore(&mut self, bins: &[u32]) -> bool {
        if bins.len() != self.bins.len() {
            return false;
        }
        self.bins.copy_from_slice(bins);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_histogram() -> Histogram {
        // The station-pair layout: 2000 bins of 100 ns over ±100 µs.
        Histogram::new(2000, -100_000, 100_000)
    }

    #[test]
    fn test_bin_placement() {
        let hist = pair_histogram();
        assert_eq!(hist.bin_index(250), 1002);
        assert_eq!(hist.bin_index(-100_000), 0);
        assert_eq!(hist.bin_index(99_999), 1999);
    }

    #[test]
    fn test_out_of_range_clamps() {
        let mut hist = pair_histogram();
        hist.fill(-500_000);
        hist.fill(500_000);
        assert_eq!(hist.bins()[0], 1);
        assert_eq!(hist.bins()[1999], 1);
        assert_eq!(hist.total(), 2);
    }

    #[test]
    fn test_restore_round_trip() {
        let mut hist = Histogram::new(4, 0, 8);
        hist.fill(1);
        hist.fill(3);
        hist.fill(3);

        let mut other = Histogram::new(4, 0, 8);
        assert!(other.restore(hist.bins()));
        assert_eq!(other, hist);

        assert!(!other.restore(&[1, 2]));
    }
}
