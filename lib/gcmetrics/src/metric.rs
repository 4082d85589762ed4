use crate::timer::TimerSnapshot;
use common::util::time::{format_bytes, format_duration};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Read-only copy of the aggregate collector state.
///
/// Built from individual atomic loads, so quantities are each consistent but
/// may straddle a notification that is being processed concurrently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcSnapshot {
    /// Whether the heap was laid out as young + old generations at bind time.
    pub generational: bool,
    /// Notifications processed since bind.
    pub notifications: u64,
    /// Bytes allocated into young pools since bind.
    pub allocated_bytes: u64,
    /// Bytes that moved into the old generation since bind.
    pub promoted_bytes: u64,
    /// Old-generation usage after the last qualifying collection.
    pub live_data_size_bytes: u64,
    /// Old-generation capacity as last reported.
    pub max_data_size_bytes: u64,
    pub pause: TimerSnapshot,
    pub concurrent: TimerSnapshot,
}

impl GcSnapshot {
    pub fn log_metric(&self) {
        info!(
            "Collections: {} ({} pause, {} concurrent)",
            self.notifications, self.pause.count, self.concurrent.count
        );
        info!(
            "Pause Time: {} (mean {}), Concurrent Time: {} (mean {})",
            format_duration(self.pause.total),
            format_duration(self.pause.mean()),
            format_duration(self.concurrent.total),
            format_duration(self.concurrent.mean())
        );
        info!(
            "Heap - Allocated: {}, Promoted: {}, Live: {}, Max: {}",
            format_bytes(self.allocated_bytes),
            format_bytes(self.promoted_bytes),
            format_bytes(self.live_data_size_bytes),
            format_bytes(self.max_data_size_bytes)
        );
    }
}
