use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free timer: count, total, max and a fixed-bucket histogram.
///
/// Each quantity is its own atomic, so a reader never sees a torn value of
/// any single quantity while a recording is in flight.
#[derive(Debug)]
pub struct Timer {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    /// Inclusive upper bounds, in milliseconds, strictly increasing.
    bounds_ms: Vec<u64>,
    /// One slot per bound plus a trailing overflow slot.
    buckets: Vec<AtomicU64>,
}

/// Point-in-time copy of a [`Timer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
    /// Cumulative `(upper bound ms, count <= bound)` pairs.
    pub buckets: Vec<(u64, u64)>,
}

impl TimerSnapshot {
    pub fn mean(&self) -> Duration {
        match self.count {
            0 => Duration::ZERO,
            count => self.total / count.min(u32::MAX as u64) as u32,
        }
    }
}

impl Timer {
    pub fn new(bounds_ms: &[u64]) -> Self {
        let mut bounds_ms = bounds_ms.to_vec();
        bounds_ms.sort_unstable();
        bounds_ms.dedup();
        let buckets = (0..=bounds_ms.len()).map(|_| AtomicU64::new(0)).collect();

        Self {
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            max_nanos: AtomicU64::new(0),
            bounds_ms,
            buckets,
        }
    }

    /// Records one phase. A zero duration is a valid, instantaneous phase.
    pub fn record(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        let _ = self
            .total_nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                Some(total.saturating_add(nanos))
            });
        self.max_nanos.fetch_max(nanos, Ordering::AcqRel);

        let slot = self.bounds_ms.partition_point(|bound| *bound < millis);
        self.buckets[slot].fetch_add(1, Ordering::AcqRel);

        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Acquire))
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let mut cumulative = 0u64;
        let buckets = self
            .bounds_ms
            .iter()
            .zip(&self.buckets)
            .map(|(bound, slot)| {
                cumulative += slot.load(Ordering::Acquire);
                (*bound, cumulative)
            })
            .collect();

        TimerSnapshot {
            count: self.count(),
            total: self.total(),
            max: self.max(),
            buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_is_counted() {
        let timer = Timer::new(&[1, 10]);

        timer.record(Duration::ZERO);

        assert_eq!(timer.count(), 1);
        assert_eq!(timer.total(), Duration::ZERO);
        assert_eq!(timer.snapshot().buckets, vec![(1, 1), (10, 1)]);
    }

    #[test]
    fn totals_max_and_buckets() {
        let timer = Timer::new(&[10, 5, 100]);

        timer.record(Duration::from_millis(5));
        timer.record(Duration::from_millis(15));
        timer.record(Duration::from_millis(500));

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.total, Duration::from_millis(520));
        assert_eq!(snapshot.max, Duration::from_millis(500));
        // Bounds are sorted; the 500ms sample only lives in the overflow slot.
        assert_eq!(snapshot.buckets, vec![(5, 1), (10, 1), (100, 2)]);
        assert_eq!(snapshot.mean(), Duration::from_nanos(173_333_333));
    }

    #[test]
    fn empty_snapshot_has_zero_mean() {
        let timer = Timer::new(&[]);

        assert_eq!(timer.snapshot().mean(), Duration::ZERO);
        assert!(timer.snapshot().buckets.is_empty());
    }
}
