// SPDX-License-Identifier: MIT
//! Observability utilities.
//!
//! Request latency tracking and the health probe payload.

use std::time::Instant;
use tracing::{debug, info};

/// Operations slower than this are logged at info level.
const SLOW_OPERATION_MS: u128 = 1000;

/// Track latency of an async operation and emit a structured log event.
///
/// Examples:
///   let tracker = LatencyTracker::start("task.create");
///   ... do the work ...
///   tracker.finish();
pub struct LatencyTracker {
    operation: String,
    start: Instant,
}

impl LatencyTracker {
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Finish tracking and emit a log event with the elapsed time.
    pub fn finish(self) {
        let elapsed_ms = self.start.elapsed().as_millis();
        if elapsed_ms > SLOW_OPERATION_MS {
            info!(
                operation = %self.operation,
                elapsed_ms = elapsed_ms,
                "slow operation"
            );
        } else {
            debug!(
                operation = %self.operation,
                elapsed_ms = elapsed_ms,
                "operation complete"
            );
        }
    }
}

/// Payload for `GET /api/v1/health`.
///
/// `status` is "ok" while the database answers; a failed liveness probe
/// degrades it without taking the endpoint down. `time_tracking` mirrors
/// the config switch so clients can hide hour columns when it is off.
#[derive(Debug, serde::Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub db_ok: bool,
    pub time_tracking: bool,
}

impl HealthStatus {
    pub fn new(uptime_secs: u64, db_ok: bool, time_tracking: bool) -> Self {
        Self {
            status: if db_ok { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs,
            db_ok,
            time_tracking,
        }
    }
}
