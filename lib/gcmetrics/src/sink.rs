//! The boundary between the aggregator and whatever exposes the instruments.

use getset::Getters;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;

/// Stable instrument names. A configured prefix may be prepended.
pub mod names {
    pub const MEMORY_ALLOCATED: &str = "gc.memory.allocated";
    pub const MEMORY_PROMOTED: &str = "gc.memory.promoted";
    pub const LIVE_DATA_SIZE: &str = "gc.live.data.size";
    pub const MAX_DATA_SIZE: &str = "gc.max.data.size";
    pub const PAUSE: &str = "gc.pause";
    pub const CONCURRENT_PHASE_TIME: &str = "gc.concurrent.phase.time";
}

/// Tag keys attached to the phase timers.
pub mod tags {
    pub const GC: &str = "gc";
    pub const ACTION: &str = "action";
    pub const CAUSE: &str = "cause";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Metrics sink unavailable: {0}")]
    Unavailable(String),
    #[error("Meter {id} is registered as a {found}, not a {expected}")]
    KindMismatch {
        id: MeterId,
        expected: MeterKind,
        found: MeterKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeterKind {
    Counter,
    Gauge,
    Timer,
}

impl fmt::Display for MeterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterKind::Counter => write!(f, "counter"),
            MeterKind::Gauge => write!(f, "gauge"),
            MeterKind::Timer => write!(f, "timer"),
        }
    }
}

/// Instrument name plus its tag dimensions. Tags are kept sorted by key so
/// that equal dimension sets compare and hash equal.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Getters,
)]
#[getset(get = "pub")]
pub struct MeterId {
    name: String,
    tags: Vec<(String, String)>,
}

impl MeterId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
        }
    }

    /// Adds a tag, replacing any existing value for the same key.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();

        match self.tags.binary_search_by(|(k, _)| k.as_str().cmp(key.as_str())) {
            Ok(index) => self.tags[index].1 = value,
            Err(index) => self.tags.insert(index, (key, value)),
        }

        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.tags.is_empty() {
            let tags = self
                .tags
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            write!(f, "{{{}}}", tags)?;
        }
        Ok(())
    }
}

/// Where aggregated values are pushed.
///
/// Implementations must be cheap and non-blocking; they are called on the
/// notification delivery path. A failing call is dropped by the caller and
/// retried implicitly on the next notification.
pub trait MetricsSink: Send + Sync {
    /// Declares an instrument with a zero value. Re-registering is a no-op.
    fn register(&self, id: &MeterId, kind: MeterKind) -> Result<(), SinkError>;

    fn increment_counter(&self, id: &MeterId, amount: u64) -> Result<(), SinkError>;

    fn set_gauge(&self, id: &MeterId, value: u64) -> Result<(), SinkError>;

    fn record_timer(&self, id: &MeterId, duration: Duration) -> Result<(), SinkError>;
}

/// A reference-counted reference to a [`MetricsSink`].
pub type MetricsSinkRef = Arc<dyn MetricsSink>;
