//! The collector metrics state machine.
//!
//! Every notification is a pure transition of the cumulative state: one timer
//! sample, a clamped allocation delta from the young pools, a clamped
//! promotion delta from the old pool, and the latest old-pool usage and
//! capacity. Results are mirrored to the [`MetricsSink`] after each event.

use crate::collector::{CollectorClassifier, GcPhase, GenerationAge};
use crate::event::NotificationEvent;
use crate::generation::GenerationTracker;
use crate::metric::GcSnapshot;
use crate::pool::PoolUsage;
use crate::sink::{names, tags, MeterId, MeterKind, MetricsSink, MetricsSinkRef};
use crate::source::NotificationListener;
use crate::timer::Timer;
use common::GcMetricsConfig;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

/// Tag value used when a notification leaves a tagged field empty.
const UNKNOWN_TAG: &str = "unknown";

/// Adds to a monotonic counter, saturating instead of wrapping.
fn saturating_add(counter: &AtomicU64, delta: u64) {
    if delta > 0 {
        let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_add(delta))
        });
    }
}

/// Cumulative collector state. Written by the delivery task only; read by
/// anyone through atomic loads.
#[derive(Debug)]
pub struct AggregateState {
    allocated_bytes: AtomicU64,
    promoted_bytes: AtomicU64,
    live_data_size_bytes: AtomicU64,
    max_data_size_bytes: AtomicU64,
    notifications: AtomicU64,
    pause_timer: Timer,
    concurrent_timer: Timer,
}

impl AggregateState {
    pub fn new(histogram_buckets_ms: &[u64]) -> Self {
        Self {
            allocated_bytes: AtomicU64::new(0),
            promoted_bytes: AtomicU64::new(0),
            live_data_size_bytes: AtomicU64::new(0),
            max_data_size_bytes: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            pause_timer: Timer::new(histogram_buckets_ms),
            concurrent_timer: Timer::new(histogram_buckets_ms),
        }
    }

    fn timer(&self, phase: GcPhase) -> &Timer {
        match phase {
            GcPhase::Pause => &self.pause_timer,
            GcPhase::Concurrent => &self.concurrent_timer,
        }
    }
}

/// Resolved instrument ids for one binding.
#[derive(Debug, Clone)]
pub struct Instruments {
    pub allocated: MeterId,
    pub promoted: MeterId,
    pub live_data_size: MeterId,
    pub max_data_size: MeterId,
    pause_name: String,
    concurrent_name: String,
    tag_cause: bool,
}

impl Instruments {
    pub fn from_config(config: &GcMetricsConfig) -> Self {
        Self {
            allocated: MeterId::new(config.metric_name(names::MEMORY_ALLOCATED)),
            promoted: MeterId::new(config.metric_name(names::MEMORY_PROMOTED)),
            live_data_size: MeterId::new(config.metric_name(names::LIVE_DATA_SIZE)),
            max_data_size: MeterId::new(config.metric_name(names::MAX_DATA_SIZE)),
            pause_name: config.metric_name(names::PAUSE),
            concurrent_name: config.metric_name(names::CONCURRENT_PHASE_TIME),
            tag_cause: *config.tag_cause(),
        }
    }

    /// Counters and gauges, registered eagerly at bind. Timers are created
    /// on first use since their tags come from the notifications.
    pub fn eager(&self) -> [(&MeterId, MeterKind); 4] {
        [
            (&self.allocated, MeterKind::Counter),
            (&self.promoted, MeterKind::Counter),
            (&self.live_data_size, MeterKind::Gauge),
            (&self.max_data_size, MeterKind::Gauge),
        ]
    }

    pub fn timer_id(&self, phase: GcPhase, event: &NotificationEvent) -> MeterId {
        let name = match phase {
            GcPhase::Pause => &self.pause_name,
            GcPhase::Concurrent => &self.concurrent_name,
        };
        let or_unknown = |value: &str| match value.trim() {
            "" => UNKNOWN_TAG.to_string(),
            value => value.to_string(),
        };

        let id = MeterId::new(name.as_str())
            .with_tag(tags::GC, or_unknown(&event.collector_name))
            .with_tag(tags::ACTION, or_unknown(&event.action));

        if self.tag_cause {
            id.with_tag(tags::CAUSE, or_unknown(&event.cause))
        } else {
            id
        }
    }
}

/// Consumes notifications one at a time and keeps the collector metrics.
pub struct MetricsAggregator {
    classifier: CollectorClassifier,
    tracker: GenerationTracker,
    instruments: Instruments,
    state: AggregateState,
    /// `used_after` of each young pool at its last notification.
    baselines: DashMap<String, u64>,
    sink: Option<MetricsSinkRef>,
    pushed_allocated: AtomicU64,
    pushed_promoted: AtomicU64,
    sink_degraded: AtomicBool,
}

impl fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("topology", self.tracker.topology())
            .field("state", &self.state)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl MetricsAggregator {
    pub fn new(
        classifier: CollectorClassifier,
        tracker: GenerationTracker,
        config: &GcMetricsConfig,
        sink: Option<MetricsSinkRef>,
    ) -> Self {
        Self {
            classifier,
            tracker,
            instruments: Instruments::from_config(config),
            state: AggregateState::new(config.histogram_buckets_ms()),
            baselines: DashMap::new(),
            sink,
            pushed_allocated: AtomicU64::new(0),
            pushed_promoted: AtomicU64::new(0),
            sink_degraded: AtomicBool::new(false),
        }
    }

    pub fn instruments(&self) -> &Instruments {
        &self.instruments
    }

    pub fn is_generational(&self) -> bool {
        self.tracker.is_generational()
    }

    /// Registers the counters and gauges with zero values. Failures are
    /// logged; the instruments are created on the next successful push.
    pub fn register_instruments(&self) {
        let Some(sink) = &self.sink else { return };

        for (id, kind) in self.instruments.eager() {
            if let Err(e) = sink.register(id, kind) {
                warn!(meter = %id, error = %e, "Failed to register instrument");
            }
        }
    }

    /// Applies one notification. Never fails and never panics on malformed
    /// input: unknown pools are skipped and absent values count as zero.
    pub fn on_notification(&self, event: &NotificationEvent) {
        let phase = self
            .classifier
            .phase_of(&event.collector_name, &event.cause);
        let duration = event.duration();

        trace!(
            collector = %event.collector_name,
            action = %event.action,
            cause = %event.cause,
            %phase,
            duration = %common::util::time::format_duration(duration),
            "Processing collector notification"
        );

        self.state.timer(phase).record(duration);
        self.state.notifications.fetch_add(1, Ordering::AcqRel);

        let allocated = self.allocated_since_last_collection(event);
        saturating_add(&self.state.allocated_bytes, allocated);

        let old = self.tracker.old_usage(event);
        let promoted = match (self.tracker.is_generational(), old) {
            (true, Some(old)) => old.growth(),
            _ => 0,
        };
        saturating_add(&self.state.promoted_bytes, promoted);

        if let Some(old) = old {
            if self.records_live_data(phase, event, old) {
                self.state
                    .live_data_size_bytes
                    .store(old.used_after, Ordering::Release);
            }
            self.state
                .max_data_size_bytes
                .store(old.max_after, Ordering::Release);
        }

        let reclaimed = event
            .pool_usages
            .iter()
            .map(PoolUsage::reclaimed)
            .fold(0u64, u64::saturating_add);
        debug!(
            allocated,
            promoted,
            reclaimed,
            %phase,
            "Applied collector notification"
        );

        self.publish(phase, event);
    }

    /// Sum over young pools of growth since the previous collection, each
    /// clamped at zero. A pool seen for the first time uses its own
    /// post-collection usage as the baseline.
    fn allocated_since_last_collection(&self, event: &NotificationEvent) -> u64 {
        self.tracker
            .young_usages(event)
            .map(|usage| {
                let baseline = self
                    .baselines
                    .insert(usage.pool_name.clone(), usage.used_after)
                    .unwrap_or(usage.used_after);
                usage.used_before.saturating_sub(baseline)
            })
            .fold(0u64, u64::saturating_add)
    }

    /// Live data size follows the old pool after a concurrent cycle. On a
    /// generational heap it also follows a pause that is not a known young
    /// collection, or any pause during which the old pool shrank. Pauses on a
    /// single-generation heap sit inside a cycle and never set it.
    fn records_live_data(
        &self,
        phase: GcPhase,
        event: &NotificationEvent,
        old: &PoolUsage,
    ) -> bool {
        match phase {
            GcPhase::Concurrent => true,
            GcPhase::Pause if !self.tracker.is_generational() => false,
            GcPhase::Pause => {
                old.shrank()
                    || GenerationAge::from_collector_name(&event.collector_name)
                        != GenerationAge::Young
            }
        }
    }

    fn publish(&self, phase: GcPhase, event: &NotificationEvent) {
        let Some(sink) = &self.sink else { return };

        let timer_id = self.instruments.timer_id(phase, event);
        let mut ok = self.report(sink.record_timer(&timer_id, event.duration()), &timer_id);

        ok &= self.sync_counter(
            sink.as_ref(),
            &self.instruments.allocated,
            &self.state.allocated_bytes,
            &self.pushed_allocated,
        );
        ok &= self.sync_counter(
            sink.as_ref(),
            &self.instruments.promoted,
            &self.state.promoted_bytes,
            &self.pushed_promoted,
        );

        let live = self.state.live_data_size_bytes.load(Ordering::Acquire);
        let max = self.state.max_data_size_bytes.load(Ordering::Acquire);
        ok &= self.report(
            sink.set_gauge(&self.instruments.live_data_size, live),
            &self.instruments.live_data_size,
        );
        ok &= self.report(
            sink.set_gauge(&self.instruments.max_data_size, max),
            &self.instruments.max_data_size,
        );

        if ok && self.sink_degraded.swap(false, Ordering::AcqRel) {
            info!("Metrics sink recovered, cumulative counters caught up");
        }
    }

    /// Pushes whatever part of a counter the sink has not seen yet. A failed
    /// push leaves the difference outstanding for the next notification.
    fn sync_counter(
        &self,
        sink: &dyn MetricsSink,
        id: &MeterId,
        total: &AtomicU64,
        pushed: &AtomicU64,
    ) -> bool {
        let total = total.load(Ordering::Acquire);
        let outstanding = total.saturating_sub(pushed.load(Ordering::Acquire));
        if outstanding == 0 {
            return true;
        }

        let ok = self.report(sink.increment_counter(id, outstanding), id);
        if ok {
            pushed.store(total, Ordering::Release);
        }
        ok
    }

    fn report(&self, result: Result<(), crate::sink::SinkError>, id: &MeterId) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                if !self.sink_degraded.swap(true, Ordering::AcqRel) {
                    warn!(meter = %id, error = %e, "Metrics sink rejected update");
                } else {
                    debug!(meter = %id, error = %e, "Metrics sink still rejecting updates");
                }
                false
            }
        }
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.state.allocated_bytes.load(Ordering::Acquire)
    }

    pub fn promoted_bytes(&self) -> u64 {
        self.state.promoted_bytes.load(Ordering::Acquire)
    }

    pub fn live_data_size_bytes(&self) -> u64 {
        self.state.live_data_size_bytes.load(Ordering::Acquire)
    }

    pub fn max_data_size_bytes(&self) -> u64 {
        self.state.max_data_size_bytes.load(Ordering::Acquire)
    }

    pub fn notifications(&self) -> u64 {
        self.state.notifications.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> GcSnapshot {
        GcSnapshot {
            generational: self.is_generational(),
            notifications: self.notifications(),
            allocated_bytes: self.allocated_bytes(),
            promoted_bytes: self.promoted_bytes(),
            live_data_size_bytes: self.live_data_size_bytes(),
            max_data_size_bytes: self.max_data_size_bytes(),
            pause: self.state.pause_timer.snapshot(),
            concurrent: self.state.concurrent_timer.snapshot(),
        }
    }
}

impl NotificationListener for MetricsAggregator {
    fn on_notification(&self, event: &NotificationEvent) {
        MetricsAggregator::on_notification(self, event);
    }
}
