//! Young/old pool bookkeeping.
//!
//! The runtime never says which pool is which generation, so pools are sorted
//! by name: anything matching a young pattern (`Eden Space`, `Survivor Space`,
//! `Nursery`) is young, and the last remaining heap pool in enumeration order
//! holds the long-lived data. A single-generation heap (`ZHeap`, `Shenandoah`)
//! plays both roles.

use crate::event::NotificationEvent;
use crate::pool::{MemoryPoolDescriptor, PoolUsage};
use common::GcMetricsConfig;
use getset::{CopyGetters, Getters};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Logical generation a pool belongs to, judged by its name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Generation {
    Young,
    Old,
    /// The whole heap of a non-generational collector.
    Single,
}

/// Case-insensitive name matching for pools.
#[derive(Debug, Clone)]
pub struct PoolNaming {
    young_patterns: Vec<String>,
    single_pools: Vec<String>,
}

impl PoolNaming {
    pub fn new<S: AsRef<str>>(young_patterns: &[S], single_pools: &[S]) -> Self {
        let lower = |items: &[S]| {
            items
                .iter()
                .map(|item| item.as_ref().trim().to_lowercase())
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
        };

        Self {
            young_patterns: lower(young_patterns),
            single_pools: lower(single_pools),
        }
    }

    pub fn from_config(config: &GcMetricsConfig) -> Self {
        Self::new(config.young_pool_patterns(), config.non_generational_pools())
    }

    pub fn generation_of(&self, pool_name: &str) -> Generation {
        let name = pool_name.to_lowercase();

        if self.single_pools.iter().any(|pool| *pool == name) {
            Generation::Single
        } else if self.young_patterns.iter().any(|p| name.contains(p.as_str())) {
            Generation::Young
        } else {
            Generation::Old
        }
    }

    pub fn is_young(&self, pool_name: &str) -> bool {
        self.generation_of(pool_name) == Generation::Young
    }
}

impl Default for PoolNaming {
    fn default() -> Self {
        Self::from_config(&GcMetricsConfig::default())
    }
}

/// Heap layout, fixed at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Getters, CopyGetters)]
pub struct GcTopology {
    #[getset(get_copy = "pub")]
    is_generational: bool,
    /// Pools whose growth between collections counts as allocation.
    #[getset(get = "pub")]
    young_pool_names: BTreeSet<String>,
    /// Pool reporting live data size and max data size.
    #[getset(get = "pub")]
    old_pool_name: Option<String>,
}

impl GcTopology {
    /// Lays out the heap pools. `declared` is the generational verdict from
    /// the collectors (or the runtime); `None` falls back to the pool names.
    pub fn detect(
        pools: &[MemoryPoolDescriptor],
        declared: Option<bool>,
        naming: &PoolNaming,
    ) -> Self {
        let heap_pools: Vec<&str> = pools
            .iter()
            .filter(|pool| pool.is_heap())
            .map(|pool| pool.name().as_str())
            .collect();

        let young: BTreeSet<String> = heap_pools
            .iter()
            .filter(|name| naming.is_young(name))
            .map(|name| name.to_string())
            .collect();

        let old = heap_pools
            .iter()
            .rev()
            .find(|name| !naming.is_young(name))
            .map(|name| name.to_string());

        let is_generational = declared.unwrap_or_else(|| {
            !young.is_empty()
                && old
                    .as_deref()
                    .map_or(false, |name| naming.generation_of(name) == Generation::Old)
        });

        let topology = if is_generational {
            Self {
                is_generational,
                young_pool_names: young,
                old_pool_name: old,
            }
        } else {
            // One logical heap: the same pool is allocation source and live-data holder.
            let single = old.or_else(|| heap_pools.last().map(|name| name.to_string()));
            Self {
                is_generational,
                young_pool_names: single.iter().cloned().collect(),
                old_pool_name: single,
            }
        };

        debug!(?topology, "Detected heap topology");
        topology
    }
}

/// Picks the young and old snapshots out of each notification.
#[derive(Debug, Clone)]
pub struct GenerationTracker {
    topology: GcTopology,
}

impl GenerationTracker {
    pub fn new(topology: GcTopology) -> Self {
        Self { topology }
    }

    pub fn topology(&self) -> &GcTopology {
        &self.topology
    }

    pub fn is_generational(&self) -> bool {
        self.topology.is_generational
    }

    pub fn young_usages<'a>(
        &'a self,
        event: &'a NotificationEvent,
    ) -> impl Iterator<Item = &'a PoolUsage> + 'a {
        event
            .pool_usages
            .iter()
            .filter(|usage| self.topology.young_pool_names.contains(&usage.pool_name))
    }

    pub fn old_usage<'a>(&self, event: &'a NotificationEvent) -> Option<&'a PoolUsage> {
        self.topology
            .old_pool_name
            .as_deref()
            .and_then(|name| event.usage_for(name))
    }
}
