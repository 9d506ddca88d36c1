//! Session statistics.
//!
//! The controller owns its counters directly; the runtime publishes
//! snapshots through a `watch` channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters for one session controller, across all connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Calls to `start` that reached the link.
    pub connections_started: u64,
    /// Sessions that reached `Ready`.
    pub sessions_ready: u64,
    /// Attempts that ended with `ConnectionFailed`.
    pub connection_failures: u64,
    /// Established sessions that went down.
    pub disconnects: u64,
    /// Operations handed to the link.
    pub operations_dispatched: u64,
    /// Operations completed with a success status.
    pub operations_succeeded: u64,
    /// Operations surfaced as failed (excluding timeouts).
    pub operations_failed: u64,
    /// Operations whose deadline expired.
    pub operations_timed_out: u64,
    /// Queued operations discarded by a teardown.
    pub operations_cancelled: u64,
    /// Reads re-dispatched after a failure status.
    pub read_retries: u64,
    /// Notifications received for a resolved role.
    pub notifications_received: u64,
    /// Payloads rejected by the temperature codec.
    pub decode_errors: u64,
    /// Link events dropped because of a generation or ticket mismatch.
    pub stale_callbacks_dropped: u64,
    /// Latency of the most recent completed operation.
    pub last_operation_ms: Option<u64>,
    /// Largest observed operation latency.
    pub max_operation_ms: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latency of a completed operation.
    pub fn record_latency(&mut self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.last_operation_ms = Some(ms);
        self.max_operation_ms = self.max_operation_ms.max(ms);
    }

    /// Operations that finished, either way.
    pub fn operations_completed(&self) -> u64 {
        self.operations_succeeded + self.operations_failed + self.operations_timed_out
    }

    /// Fraction of finished operations that succeeded.
    pub fn success_rate(&self) -> Option<f64> {
        let completed = self.operations_completed();
        if completed == 0 {
            None
        } else {
            Some(self.operations_succeeded as f64 / completed as f64)
        }
    }
}
