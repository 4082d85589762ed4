use crate::pool::PoolUsage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use typed_builder::TypedBuilder;

/// One collector notification, as delivered by the runtime.
///
/// Only portable fields are carried: the collector name, the action and cause
/// strings, the duration, and the before/after usage of each memory pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct NotificationEvent {
    #[builder(setter(into))]
    pub collector_name: String,
    /// E.g. `end of minor GC`, `end of major GC`, `end of GC cycle`.
    #[builder(default, setter(into))]
    pub action: String,
    /// E.g. `Allocation Failure`, `System.gc()`, `No GC`.
    #[builder(default, setter(into))]
    pub cause: String,
    #[builder(default)]
    pub duration_ms: u64,
    /// Pool snapshots in the runtime's enumeration order.
    #[builder(default)]
    pub pool_usages: Vec<PoolUsage>,
}

impl NotificationEvent {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn usage_for(&self, pool_name: &str) -> Option<&PoolUsage> {
        self.pool_usages
            .iter()
            .find(|usage| usage.pool_name == pool_name)
    }
}
