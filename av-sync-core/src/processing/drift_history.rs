use crate::models::metrics::DriftStats;
use crate::timing::clock::nanos_to_millis;

/// Fixed-capacity circular history of drift measurements (signed nanoseconds).
///
/// Overflow behavior: the oldest measurement is overwritten. Observability
/// only; correction decisions never read it.
#[derive(Debug, Clone)]
pub struct DriftHistory {
    buffer: Vec<i64>,
    write_index: usize,
    available: usize,
    capacity: usize,
    sum: i128,
}

impl DriftHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0; capacity],
            write_index: 0,
            available: 0,
            capacity,
            sum: 0,
        }
    }

    /// Record one measurement, evicting the oldest if full.
    pub fn record(&mut self, drift_ns: i64) {
        if self.available == self.capacity {
            self.sum -= i128::from(self.buffer[self.write_index]);
        } else {
            self.available += 1;
        }
        self.buffer[self.write_index] = drift_ns;
        self.sum += i128::from(drift_ns);
        self.write_index = (self.write_index + 1) % self.capacity;
    }

    /// Measurements oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        let start = (self.write_index + self.capacity - self.available) % self.capacity;
        (0..self.available).map(move |i| self.buffer[(start + i) % self.capacity])
    }

    pub fn latest(&self) -> Option<i64> {
        if self.available == 0 {
            return None;
        }
        Some(self.buffer[(self.write_index + self.capacity - 1) % self.capacity])
    }

    pub fn mean(&self) -> Option<f64> {
        if self.available == 0 {
            return None;
        }
        Some(self.sum as f64 / self.available as f64)
    }

    pub fn min(&self) -> Option<i64> {
        self.iter().min()
    }

    pub fn max(&self) -> Option<i64> {
        self.iter().max()
    }

    /// Number of measurements currently held.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.available = 0;
        self.sum = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> DriftStats {
        DriftStats {
            samples: self.available,
            latest_ms: self.latest().map(nanos_to_millis),
            mean_ms: self.mean().map(|mean| mean / 1_000_000.0),
            min_ms: self.min().map(nanos_to_millis),
            max_ms: self.max().map(nanos_to_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn record_and_summarize() {
        let mut history = DriftHistory::new(8);
        for drift in [10, -20, 30] {
            history.record(drift);
        }

        assert_eq!(history.count(), 3);
        assert_eq!(history.latest(), Some(30));
        assert_eq!(history.min(), Some(-20));
        assert_eq!(history.max(), Some(30));
        assert_relative_eq!(history.mean().unwrap(), 20.0 / 3.0);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut history = DriftHistory::new(3);
        for drift in 1..=5 {
            history.record(drift);
        }

        assert_eq!(history.count(), 3);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_relative_eq!(history.mean().unwrap(), 4.0);
    }

    #[test]
    fn stats_are_in_milliseconds() {
        let mut history = DriftHistory::new(4);
        history.record(2_000_000);
        history.record(-4_000_000);

        let stats = history.stats();
        assert_eq!(stats.samples, 2);
        assert_relative_eq!(stats.latest_ms.unwrap(), -4.0);
        assert_relative_eq!(stats.mean_ms.unwrap(), -1.0);
        assert_relative_eq!(stats.max_ms.unwrap(), 2.0);
    }

    #[test]
    fn reset_clears_history() {
        let mut history = DriftHistory::new(4);
        history.record(1);
        history.reset();

        assert!(history.is_empty());
        assert_eq!(history.latest(), None);
        assert_eq!(history.mean(), None);
        assert_eq!(history.stats().samples, 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut history = DriftHistory::new(0);
        history.record(5);
        history.record(6);
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![6]);
    }
}
