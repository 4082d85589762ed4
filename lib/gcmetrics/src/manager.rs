use crate::sink::{MeterId, MeterKind, MetricsSink, SinkError};
use crate::timer::{Timer, TimerSnapshot};
use core::fmt;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// A reference-counted reference to a [`MeterRegistry`].
pub type MeterRegistryRef = Arc<MeterRegistry>;

#[derive(Debug)]
enum Meter {
    Counter(AtomicU64),
    Gauge(AtomicU64),
    Timer(Timer),
}

impl Meter {
    fn kind(&self) -> MeterKind {
        match self {
            Meter::Counter(_) => MeterKind::Counter,
            Meter::Gauge(_) => MeterKind::Gauge,
            Meter::Timer(_) => MeterKind::Timer,
        }
    }

    fn value(&self) -> MeterValue {
        match self {
            Meter::Counter(count) => MeterValue::Counter(count.load(Ordering::Acquire)),
            Meter::Gauge(value) => MeterValue::Gauge(value.load(Ordering::Acquire)),
            Meter::Timer(timer) => MeterValue::Timer(timer.snapshot()),
        }
    }
}

/// Current value of one meter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MeterValue {
    Counter(u64),
    Gauge(u64),
    Timer(TimerSnapshot),
}

/// In-memory [`MetricsSink`]: every meter lives in a concurrent map and can be
/// read back or exported as JSON at any time.
pub struct MeterRegistry {
    meters: DashMap<MeterId, Arc<Meter>>,
    histogram_buckets_ms: Vec<u64>,
    available: AtomicBool,
}

impl fmt::Debug for MeterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterRegistry")
            .field("meters", &self.meters.len())
            .field("available", &self.is_available())
            .finish()
    }
}

impl Default for MeterRegistry {
    fn default() -> Self {
        Self::new(&common::config::DEFAULT_HISTOGRAM_BUCKETS_MS)
    }
}

impl MeterRegistry {
    pub fn new(histogram_buckets_ms: &[u64]) -> Self {
        Self {
            meters: DashMap::new(),
            histogram_buckets_ms: histogram_buckets_ms.to_vec(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the backend going away (or coming back). While unavailable,
    /// every sink call fails with [`SinkError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn ensure_available(&self) -> Result<(), SinkError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(SinkError::Unavailable("registry marked unavailable".to_string()))
        }
    }

    /// Looks up (or creates) a meter. The map guard is released before the
    /// meter is touched.
    fn meter(&self, id: &MeterId, kind: MeterKind) -> Result<Arc<Meter>, SinkError> {
        let meter = self
            .meters
            .entry(id.clone())
            .or_insert_with(|| {
                trace!(meter = %id, %kind, "Registering meter");
                Arc::new(match kind {
                    MeterKind::Counter => Meter::Counter(AtomicU64::new(0)),
                    MeterKind::Gauge => Meter::Gauge(AtomicU64::new(0)),
                    MeterKind::Timer => Meter::Timer(Timer::new(&self.histogram_buckets_ms)),
                })
            })
            .value()
            .clone();

        match meter.kind() {
            found if found == kind => Ok(meter),
            found => Err(SinkError::KindMismatch {
                id: id.clone(),
                expected: kind,
                found,
            }),
        }
    }

    pub fn get(&self, id: &MeterId) -> Option<MeterValue> {
        self.meters.get(id).map(|meter| meter.value().value())
    }

    /// Every meter with the given name, across all tag combinations.
    pub fn find(&self, name: &str) -> Vec<(MeterId, MeterValue)> {
        let mut found: Vec<_> = self
            .meters
            .iter()
            .filter(|entry| entry.key().name() == name)
            .map(|entry| (entry.key().clone(), entry.value().value()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.get(&MeterId::new(name))? {
            MeterValue::Counter(count) => Some(count),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        match self.get(&MeterId::new(name))? {
            MeterValue::Gauge(value) => Some(value),
            _ => None,
        }
    }

    /// All timers sharing `name`, regardless of tags.
    pub fn timers(&self, name: &str) -> Vec<(MeterId, TimerSnapshot)> {
        self.find(name)
            .into_iter()
            .filter_map(|(id, value)| match value {
                MeterValue::Timer(snapshot) => Some((id, snapshot)),
                _ => None,
            })
            .collect()
    }

    /// Count and total time summed over every tag combination of a timer.
    pub fn timer_totals(&self, name: &str) -> (u64, Duration) {
        self.timers(name)
            .iter()
            .fold((0, Duration::ZERO), |(count, total), (_, snapshot)| {
                (count + snapshot.count, total + snapshot.total)
            })
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    /// Exports every meter as a JSON object keyed by its display id.
    pub fn get_metrics(&self) -> String {
        let mut all_metrics = serde_json::Map::new();

        for (id, value) in self
            .meters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value()))
        {
            let value = serde_json::to_value(&value).unwrap_or(serde_json::Value::Null);
            all_metrics.insert(id.to_string(), value);
        }

        json!(all_metrics).to_string()
    }
}

impl MetricsSink for MeterRegistry {
    fn register(&self, id: &MeterId, kind: MeterKind) -> Result<(), SinkError> {
        self.ensure_available()?;
        self.meter(id, kind).map(|_| ())
    }

    fn increment_counter(&self, id: &MeterId, amount: u64) -> Result<(), SinkError> {
        self.ensure_available()?;
        if let Meter::Counter(count) = &*self.meter(id, MeterKind::Counter)? {
            let _ = count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(amount))
            });
        }
        Ok(())
    }

    fn set_gauge(&self, id: &MeterId, value: u64) -> Result<(), SinkError> {
        self.ensure_available()?;
        if let Meter::Gauge(gauge) = &*self.meter(id, MeterKind::Gauge)? {
            gauge.store(value, Ordering::Release);
        }
        Ok(())
    }

    fn record_timer(&self, id: &MeterId, duration: Duration) -> Result<(), SinkError> {
        self.ensure_available()?;
        if let Meter::Timer(timer) = &*self.meter(id, MeterKind::Timer)? {
            timer.record(duration);
            debug!(meter = %id, ?duration, "Recorded timer sample");
        }
        Ok(())
    }
}
