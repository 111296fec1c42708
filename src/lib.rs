//! Async Rust bridge between u-blox GNSS receivers and NTRIP correction
//! streams.
//!
//! rtklink connects a serial-attached ZED-F9P/F9R-class receiver with a
//! network-delivered RTCM3 correction stream and publishes centimeter-grade
//! navigation state to a consumer of your choosing.
//!
//! # Features
//!
//! - **Mixed-protocol decoding**: incremental UBX + NMEA framing off one
//!   live byte stream, with checksum validation and bounded resync
//! - **NTRIP client**: caster handshake, basic auth, RTCM3 type filtering,
//!   stall detection
//! - **Fix classification**: 2D/3D/DGPS/RTK-float/RTK-fixed/dead-reckoning
//!   states with transition diagnostics
//! - **Sensor fusion**: merges high-rate inertial records into solutions on
//!   dead-reckoning-capable receivers, degrading gracefully without them
//! - **Supervision**: independent reconnect backoff for device and caster,
//!   clean cancellation, no failure terminates the session
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rtklink::{RtkLink, Settings, TracingSink};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings: Settings = serde_json::from_str(r#"{
//!         "device": { "path": "/dev/ttyUSB0" }
//!     }"#).unwrap();
//!
//!     let session = RtkLink::start(settings, Arc::new(TracingSink));
//!
//!     let mut solutions = session.solutions();
//!     while let Some(update) = solutions.next().await {
//!         println!("{} ±{:.3} m", update.fix.state, update.fix.accuracy_m);
//!     }
//! }
//! ```

// Core types and error handling
pub mod backoff;
pub mod error;
pub mod settings;
pub mod types;

// Wire protocols
pub mod codec;

// Connection components
pub mod device;
pub mod ntrip;

// Solution processing
pub mod fusion;
pub mod geo;

// Orchestration and the consumer seam
pub mod orchestrator;
pub mod publish;
pub mod stream;

// Core exports
pub use backoff::Backoff;
pub use error::{GnssError, Result};
pub use settings::{
    Constellation, CorrectionSettings, DeviceSettings, DeviceVariant, DownstreamSettings, Settings,
};
pub use types::*;

// Component exports
pub use codec::FrameDecoder;
pub use device::{DeviceSession, ResetKind, SessionState};
pub use fusion::FusionAggregator;
pub use ntrip::{CasterState, CorrectionClient, CorrectionStream};

// Orchestration exports
pub use orchestrator::{GnssSession, OrchestratorState};
pub use publish::{PublishSink, SolutionUpdate, StatusUpdate, TracingSink};
pub use stream::PaceExt;

/// Unified entry point for rtklink sessions.
///
/// # Example
///
/// ```rust,no_run
/// use rtklink::{RtkLink, Settings, TracingSink};
/// use std::sync::Arc;
///
/// # async fn run(settings: Settings) {
/// let session = RtkLink::start(settings, Arc::new(TracingSink));
/// // ... consume session.solutions() ...
/// session.stop().await;
/// # }
/// ```
pub struct RtkLink;

impl RtkLink {
    /// Start a session: open and configure the receiver, connect the
    /// correction stream when enabled, and begin publishing.
    ///
    /// Returns immediately with a [`GnssSession`] handle. Connection
    /// failures are reported through the sink and retried under backoff
    /// rather than returned -- a missing USB device may appear later, and
    /// GPS-only operation without a caster is valid.
    pub fn start(settings: Settings, sink: std::sync::Arc<dyn PublishSink>) -> GnssSession {
        GnssSession::start(settings, sink)
    }
}
