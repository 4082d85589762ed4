//! Bind/unbind lifecycle.
//!
//! Binding snapshots the runtime's collectors and pools, fixes the topology,
//! registers the instruments and subscribes an aggregator to the notification
//! source. Unbinding only unsubscribes: values already pushed stay visible.

use crate::aggregator::MetricsAggregator;
use crate::collector::CollectorClassifier;
use crate::generation::{GcTopology, GenerationTracker, PoolNaming};
use crate::metric::GcSnapshot;
use crate::provider::CollectorDescriptorProvider;
use crate::sink::MetricsSinkRef;
use crate::source::{NotificationListener, NotificationSourceRef, SourceError, SubscriptionId};
use common::GcMetricsConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of [`GcMetricsBinder::bind`]. Neither variant is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Subscribed(SubscriptionId),
    /// The source refused the subscription. Instruments are registered but
    /// stay at their initial values.
    Degraded(SourceError),
}

impl BindOutcome {
    pub fn is_subscribed(&self) -> bool {
        matches!(self, BindOutcome::Subscribed(_))
    }
}

struct Binding {
    aggregator: Arc<MetricsAggregator>,
    source: NotificationSourceRef,
    subscription: Option<SubscriptionId>,
}

/// Owns at most one live binding of collector metrics to a sink.
pub struct GcMetricsBinder {
    config: GcMetricsConfig,
    binding: Mutex<Option<Binding>>,
}

impl GcMetricsBinder {
    pub fn new(config: GcMetricsConfig) -> Self {
        Self {
            config,
            binding: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GcMetricsConfig {
        &self.config
    }

    /// Binds to `sink`, replacing any previous binding. No lock is held while
    /// the provider, the source or the sink are called.
    #[instrument(skip_all)]
    pub fn bind(
        &self,
        provider: &dyn CollectorDescriptorProvider,
        source: NotificationSourceRef,
        sink: MetricsSinkRef,
    ) -> BindOutcome {
        if self.is_bound() {
            warn!("Already bound, releasing the previous binding first");
            self.unbind();
        }

        let collectors = provider.collectors();
        let pools = provider.memory_pools();
        let naming = PoolNaming::from_config(&self.config);

        let declared = CollectorClassifier::is_generational(
            &collectors,
            provider.is_generational_hint(),
            &naming,
        );
        let topology = GcTopology::detect(&pools, declared, &naming);
        info!(
            collectors = collectors.len(),
            pools = pools.len(),
            generational = topology.is_generational(),
            old_pool = ?topology.old_pool_name(),
            "Binding collector metrics"
        );

        let aggregator = Arc::new(MetricsAggregator::new(
            CollectorClassifier::new(&collectors),
            GenerationTracker::new(topology),
            &self.config,
            Some(sink),
        ));
        aggregator.register_instruments();

        let listener: Arc<dyn NotificationListener> = aggregator.clone();
        let (outcome, subscription) = match source.subscribe(listener) {
            Ok(id) => {
                debug!(subscription = %id, "Subscribed to collector notifications");
                (BindOutcome::Subscribed(id), Some(id))
            }
            Err(e) => {
                warn!(error = %e, "Collector notifications unavailable, metrics will stay at zero");
                (BindOutcome::Degraded(e), None)
            }
        };

        let replaced = self.binding.lock().replace(Binding {
            aggregator,
            source,
            subscription,
        });
        if let Some(stale) = replaced {
            // A concurrent bind slipped in between; drop its subscription.
            Self::release(stale);
        }

        outcome
    }

    /// Stops future deliveries. Safe to call repeatedly or mid-delivery.
    #[instrument(skip_all)]
    pub fn unbind(&self) {
        let binding = self.binding.lock().take();

        match binding {
            Some(binding) => {
                let aggregator = Arc::clone(&binding.aggregator);
                Self::release(binding);
                info!("Unbound collector metrics");
                aggregator.snapshot().log_metric();
            }
            None => debug!("Unbind requested while not bound"),
        }
    }

    fn release(binding: Binding) {
        if let Some(id) = binding.subscription {
            if let Err(e) = binding.source.unsubscribe(id) {
                debug!(subscription = %id, error = %e, "Unsubscribe failed");
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        self.binding.lock().is_some()
    }

    /// Whether the bound heap is generational (false when unbound).
    pub fn is_generational(&self) -> bool {
        self.aggregator()
            .map_or(false, |aggregator| aggregator.is_generational())
    }

    pub fn aggregator(&self) -> Option<Arc<MetricsAggregator>> {
        self.binding
            .lock()
            .as_ref()
            .map(|binding| Arc::clone(&binding.aggregator))
    }

    pub fn snapshot(&self) -> Option<GcSnapshot> {
        self.aggregator().map(|aggregator| aggregator.snapshot())
    }
}

impl Default for GcMetricsBinder {
    fn default() -> Self {
        Self::new(GcMetricsConfig::default())
    }
}

impl Drop for GcMetricsBinder {
    fn drop(&mut self) {
        self.unbind();
    }
}
