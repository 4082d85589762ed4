use gcmetrics::sink::names;
use gcmetrics::{
    BindOutcome, ChannelNotificationSource, CollectorDescriptor, GcMetricsBinder, GcSnapshot,
    MemoryPoolDescriptor, MeterRegistry, NotificationEvent, NotificationPublisher, PoolUsage,
    StaticDescriptorProvider,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

const EDEN: &str = "G1 Eden Space";
const SURVIVOR: &str = "G1 Survivor Space";
const OLD: &str = "G1 Old Gen";

/// Notifications arrive some time after the collection; give them this long.
const DELIVERY_TIMEOUT: Duration = Duration::from_millis(200);

fn g1_provider() -> StaticDescriptorProvider {
    StaticDescriptorProvider::builder()
        .collectors(vec![
            CollectorDescriptor::new("G1 Young Generation", None, [EDEN, SURVIVOR, OLD]).unwrap(),
            CollectorDescriptor::new("G1 Old Generation", None, [EDEN, SURVIVOR, OLD]).unwrap(),
            CollectorDescriptor::new("G1 Concurrent GC", Some(true), [OLD]).unwrap(),
        ])
        .memory_pools(vec![
            MemoryPoolDescriptor::non_heap("Metaspace"),
            MemoryPoolDescriptor::heap(EDEN),
            MemoryPoolDescriptor::heap(OLD),
            MemoryPoolDescriptor::heap(SURVIVOR),
        ])
        .build()
}

fn zgc_provider() -> StaticDescriptorProvider {
    StaticDescriptorProvider::builder()
        .collectors(vec![
            CollectorDescriptor::new("ZGC Cycles", None, ["ZHeap"]).unwrap(),
            CollectorDescriptor::new("ZGC Pauses", None, ["ZHeap"]).unwrap(),
        ])
        .memory_pools(vec![MemoryPoolDescriptor::heap("ZHeap")])
        .build()
}

struct Harness {
    binder: GcMetricsBinder,
    registry: Arc<MeterRegistry>,
    source: Arc<ChannelNotificationSource>,
    publisher: NotificationPublisher,
}

impl Harness {
    fn bind(provider: &StaticDescriptorProvider) -> Self {
        let _ = common::util::trace::initialize_tracing();

        let (source, publisher) = ChannelNotificationSource::spawn();
        let registry = Arc::new(MeterRegistry::default());
        let binder = GcMetricsBinder::default();

        let outcome = binder.bind(provider, source.clone(), registry.clone());
        assert!(matches!(outcome, BindOutcome::Subscribed(_)));

        Self {
            binder,
            registry,
            source,
            publisher,
        }
    }

    fn publish(&self, event: NotificationEvent) {
        self.publisher.publish(event).expect("delivery task running");
    }

    /// Polls until `condition` holds or the delivery timeout elapses.
    async fn await_until(&self, condition: impl Fn(&MeterRegistry) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + DELIVERY_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if condition(&self.registry) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition(&self.registry)
    }

    fn processed(&self) -> u64 {
        self.binder
            .snapshot()
            .map(|snapshot| snapshot.notifications)
            .unwrap_or_default()
    }
}

fn notification(
    collector: &str,
    action: &str,
    cause: &str,
    duration_ms: u64,
    usages: Vec<PoolUsage>,
) -> NotificationEvent {
    NotificationEvent::builder()
        .collector_name(collector)
        .action(action)
        .cause(cause)
        .duration_ms(duration_ms)
        .pool_usages(usages)
        .build()
}

#[tokio::test]
async fn gc_metrics_available_after_gc() {
    let harness = Harness::bind(&g1_provider());

    harness.publish(notification(
        "G1 Old Generation",
        "end of major GC",
        "System.gc()",
        25,
        vec![
            PoolUsage::new(EDEN, 4096, 0, 8192, 8192),
            PoolUsage::new(SURVIVOR, 512, 0, 1024, 1024),
            PoolUsage::new(OLD, 9000, 6000, 32768, 32768),
        ],
    ));

    assert!(
        harness
            .await_until(|r| r.gauge(names::LIVE_DATA_SIZE).unwrap_or(0) > 0)
            .await,
        "listener takes time after GC"
    );
    assert!(harness.registry.counter(names::MEMORY_ALLOCATED).unwrap() > 0);
    assert!(harness.registry.gauge(names::MAX_DATA_SIZE).unwrap() > 0);

    assert!(harness.binder.is_generational());
    // Promotion cannot be guaranteed, only that the counter exists.
    assert!(harness.registry.counter(names::MEMORY_PROMOTED).is_some());
}

#[tokio::test]
async fn gc_timing_is_attributed_per_phase() {
    let harness = Harness::bind(&zgc_provider());
    let heap = |before, after| vec![PoolUsage::new("ZHeap", before, after, 4096, 4096)];

    harness.publish(notification("ZGC Pauses", "end of GC pause", "Warmup", 1, vec![]));
    harness.publish(notification("ZGC Cycles", "end of GC cycle", "Warmup", 40, heap(900, 300)));
    harness.publish(notification("ZGC Pauses", "end of GC pause", "Warmup", 0, vec![]));
    harness.publish(notification(
        "ZGC Cycles",
        "end of GC cycle",
        "Proactive",
        35,
        heap(1200, 400),
    ));

    assert!(harness.await_until(|_| harness.processed() == 4).await);

    assert_eq!(
        harness.registry.timer_totals(names::PAUSE),
        (2, Duration::from_millis(1))
    );
    assert_eq!(
        harness.registry.timer_totals(names::CONCURRENT_PHASE_TIME),
        (2, Duration::from_millis(75))
    );
    assert_eq!(harness.registry.timers(names::CONCURRENT_PHASE_TIME).len(), 2);

    // 900 - 300 on first sight, then 1200 - 300 since the previous cycle.
    assert_eq!(harness.registry.counter(names::MEMORY_ALLOCATED), Some(1500));
    assert_eq!(harness.registry.counter(names::MEMORY_PROMOTED), Some(0));
    assert_eq!(harness.registry.gauge(names::LIVE_DATA_SIZE), Some(400));
    assert!(!harness.binder.is_generational());
}

#[tokio::test]
async fn unbind_stops_future_updates() {
    let harness = Harness::bind(&g1_provider());
    let young = |before| {
        notification(
            "G1 Young Generation",
            "end of minor GC",
            "G1 Evacuation Pause",
            3,
            vec![PoolUsage::new(EDEN, before, 0, 8192, 8192)],
        )
    };

    harness.publish(young(100));
    assert!(
        harness
            .await_until(|r| r.counter(names::MEMORY_ALLOCATED) == Some(100))
            .await
    );

    harness.binder.unbind();
    assert_eq!(harness.source.subscriber_count(), 0);
    harness.publish(young(500));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.registry.counter(names::MEMORY_ALLOCATED), Some(100));
    assert_eq!(harness.registry.timer_totals(names::PAUSE).0, 1);
}

/// Publishes a seeded random stream, checking every snapshot seen on the way
/// (and the final one) for monotonic counters plus `check`.
async fn run_seeded_stream(
    provider: &StaticDescriptorProvider,
    collectors: &[&str],
    pools: &[&str],
    seed: u64,
    check: impl Fn(&GcSnapshot),
) -> (Harness, GcSnapshot) {
    let harness = Harness::bind(provider);
    let mut rng = StdRng::seed_from_u64(seed);
    let total = 200u64;

    let mut last = GcSnapshot::default();
    let mut observe = |snapshot: GcSnapshot| {
        assert!(snapshot.allocated_bytes >= last.allocated_bytes);
        assert!(snapshot.promoted_bytes >= last.promoted_bytes);
        check(&snapshot);
        last = snapshot;
    };

    for _ in 0..total {
        let collector = collectors[rng.gen_range(0..collectors.len())];
        let usages = pools
            .iter()
            .map(|pool| {
                let (before, after) = (rng.gen_range(0..8192), rng.gen_range(0..8192));
                PoolUsage::new(*pool, before, after, 8192, 8192)
            })
            .collect();
        harness.publish(notification(
            collector,
            "end of GC",
            "Allocation Failure",
            rng.gen_range(0..50),
            usages,
        ));

        if let Some(snapshot) = harness.binder.snapshot() {
            observe(snapshot);
        }
        tokio::task::yield_now().await;
    }

    assert!(harness.await_until(|_| harness.processed() == total).await);

    let snapshot = harness.binder.snapshot().unwrap();
    observe(snapshot.clone());
    assert_eq!(snapshot.pause.count + snapshot.concurrent.count, total);

    let (pause_count, _) = harness.registry.timer_totals(names::PAUSE);
    let (concurrent_count, _) = harness.registry.timer_totals(names::CONCURRENT_PHASE_TIME);
    assert_eq!(pause_count + concurrent_count, total);
    assert_eq!(
        harness.registry.counter(names::MEMORY_ALLOCATED),
        Some(snapshot.allocated_bytes)
    );

    (harness, snapshot)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generational_random_streams_keep_invariants() {
    let collectors = ["G1 Young Generation", "G1 Old Generation", "G1 Concurrent GC"];

    let (_harness, snapshot) =
        run_seeded_stream(&g1_provider(), &collectors, &[EDEN, OLD], 0x6c, |_| {}).await;

    assert!(snapshot.generational);
    assert!(snapshot.allocated_bytes > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_generation_random_streams_never_promote() {
    let collectors = ["ZGC Cycles", "ZGC Pauses"];

    let (harness, snapshot) =
        run_seeded_stream(&zgc_provider(), &collectors, &["ZHeap"], 0x2a, |snapshot| {
            assert_eq!(snapshot.promoted_bytes, 0);
        })
        .await;

    assert!(!snapshot.generational);
    assert_eq!(harness.registry.counter(names::MEMORY_PROMOTED), Some(0));
}
