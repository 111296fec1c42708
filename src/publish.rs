//! Publish sink: the seam to the downstream consumer.
//!
//! The orchestrator pushes independent, self-contained updates through this
//! trait -- a solution with its fix classification, connectivity flags, and
//! correction statistics. Updates from the device path and the correction
//! path may interleave; each call carries everything it needs, so a sink
//! never has to hold cross-call state under a lock. Sinks must not block the
//! publishing path: the orchestrator wraps every call in a bounded timeout
//! and drops the update for that cycle if the sink overruns it.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::types::correction::CorrectionStats;
use crate::types::fix::FixAssessment;
use crate::types::solution::NavigationSolution;

/// One published navigation update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolutionUpdate {
    pub solution: NavigationSolution,
    pub fix: FixAssessment,
    /// The receiver's time tag ran backwards relative to the previous
    /// solution. Passed through and flagged, never re-sorted.
    pub out_of_order: bool,
}

/// Connectivity change for one of the two upstream connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub connected: bool,
    /// Diagnostic reason when disconnected, e.g. the error text.
    pub reason: Option<String>,
}

impl StatusUpdate {
    pub fn up() -> Self {
        Self { connected: true, reason: None }
    }

    pub fn down(reason: impl Into<String>) -> Self {
        Self { connected: false, reason: Some(reason.into()) }
    }
}

/// Consumer-side contract for decoded state.
#[async_trait]
pub trait PublishSink: Send + Sync + 'static {
    /// A navigation solution with its fix classification.
    async fn publish_solution(&self, update: SolutionUpdate);

    /// Device connectivity changed.
    async fn publish_device_status(&self, update: StatusUpdate);

    /// Correction-stream connectivity changed.
    async fn publish_correction_status(&self, update: StatusUpdate);

    /// Correction forwarding statistics.
    async fn publish_correction_stats(&self, stats: CorrectionStats);
}

/// Sink that logs updates through `tracing` and otherwise drops them.
///
/// Useful as a default while wiring a deployment up, and as the fallback in
/// examples and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl PublishSink for TracingSink {
    async fn publish_solution(&self, update: SolutionUpdate) {
        info!(
            lat = update.solution.lat_deg,
            lon = update.solution.lon_deg,
            fix = %update.fix.state,
            acc_m = update.fix.accuracy_m,
            satellites = update.solution.satellites,
            "solution"
        );
    }

    async fn publish_device_status(&self, update: StatusUpdate) {
        info!(connected = update.connected, reason = ?update.reason, "device status");
    }

    async fn publish_correction_status(&self, update: StatusUpdate) {
        info!(connected = update.connected, reason = ?update.reason, "correction status");
    }

    async fn publish_correction_stats(&self, stats: CorrectionStats) {
        debug!(
            seen = stats.messages_seen,
            forwarded = stats.messages_forwarded,
            bytes = stats.bytes_forwarded,
            last_type = stats.last_message_type,
            "correction stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_constructors() {
        assert_eq!(StatusUpdate::up(), StatusUpdate { connected: true, reason: None });
        let down = StatusUpdate::down("device unplugged");
        assert!(!down.connected);
        assert_eq!(down.reason.as_deref(), Some("device unplugged"));
    }

    #[test]
    fn sink_trait_is_object_safe() {
        let _: Box<dyn PublishSink> = Box::new(TracingSink);
    }
}
