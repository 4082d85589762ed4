//! Collector telemetry: turns garbage collector notifications into allocation,
//! promotion, live-data-size, max-data-size and phase-timing instruments.

pub mod aggregator;
pub mod binder;
pub mod collector;
pub mod event;
pub mod generation;
pub mod manager;
pub mod metric;
pub mod pool;
pub mod provider;
pub mod sink;
pub mod source;
pub mod timer;

pub use aggregator::MetricsAggregator;
pub use binder::{BindOutcome, GcMetricsBinder};
pub use collector::{CollectorClassifier, CollectorDescriptor, GcPhase, GenerationAge};
pub use event::NotificationEvent;
pub use generation::{GcTopology, Generation, GenerationTracker, PoolNaming};
pub use manager::{MeterRegistry, MeterRegistryRef};
pub use metric::GcSnapshot;
pub use pool::{MemoryPoolDescriptor, PoolUsage};
pub use provider::{CollectorDescriptorProvider, StaticDescriptorProvider};
pub use sink::{MeterId, MeterKind, MetricsSink, MetricsSinkRef, SinkError};
pub use source::{
    ChannelNotificationSource, NotificationListener, NotificationPublisher, NotificationSource,
    SourceError, SubscriptionId,
};
pub use timer::{Timer, TimerSnapshot};
