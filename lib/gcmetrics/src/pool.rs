use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Usage of one memory pool immediately before and after a collection.
///
/// Every field defaults to zero when absent from the notification, so a
/// partially populated snapshot yields zero deltas rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct PoolUsage {
    #[builder(setter(into))]
    pub pool_name: String,
    #[builder(default)]
    pub used_before: u64,
    #[builder(default)]
    pub used_after: u64,
    #[builder(default)]
    pub max_before: u64,
    #[builder(default)]
    pub max_after: u64,
}

impl PoolUsage {
    pub fn new(
        pool_name: impl Into<String>,
        used_before: u64,
        used_after: u64,
        max_before: u64,
        max_after: u64,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            used_before,
            used_after,
            max_before,
            max_after,
        }
    }

    /// Bytes released from this pool by the collection (zero if it grew).
    pub fn reclaimed(&self) -> u64 {
        self.used_before.saturating_sub(self.used_after)
    }

    /// Bytes this pool grew by during the collection (zero if it shrank).
    pub fn growth(&self) -> u64 {
        self.used_after.saturating_sub(self.used_before)
    }

    pub fn shrank(&self) -> bool {
        self.used_after < self.used_before
    }
}

/// A memory pool as enumerated by the runtime at bind time.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Getters, CopyGetters, TypedBuilder,
)]
pub struct MemoryPoolDescriptor {
    #[getset(get = "pub")]
    #[builder(setter(into))]
    name: String,
    /// `false` for non-heap pools such as metaspace or the code cache.
    #[getset(get_copy = "pub")]
    #[builder(default = true)]
    is_heap: bool,
}

impl MemoryPoolDescriptor {
    pub fn heap(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_heap: true,
        }
    }

    pub fn non_heap(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_heap: false,
        }
    }
}
