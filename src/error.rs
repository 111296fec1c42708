//! Error types for the GNSS streaming core.
//!
//! All fallible operations in this crate return [`GnssError`]. The taxonomy
//! distinguishes failures that require different operator action: a missing
//! serial device is not the same problem as a caster rejecting credentials,
//! and a NAK'd configuration command is not the same problem as a dead link.
//!
//! ## Transient vs. persistent
//!
//! Nothing in this crate terminates the process. Every connection-class error
//! feeds the orchestrator's reconnect backoff; [`GnssError::is_transient`]
//! tells supervision code whether a failure is expected churn (stalled stream,
//! vanished USB device) or something an operator has to fix (bad credentials,
//! rejected configuration value). Malformed frames are recovered inside the
//! decoder by skip-and-resync and never surface as fatal errors.
//!
//! ```rust
//! use rtklink::GnssError;
//!
//! let err = GnssError::stream_stalled(std::time::Duration::from_secs(30));
//! assert!(err.is_transient());
//! ```

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for GNSS core operations.
pub type Result<T, E = GnssError> = std::result::Result<T, E>;

/// Main error type for the GNSS streaming core.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GnssError {
    #[error("GNSS device not found at {path}")]
    DeviceNotFound { path: PathBuf },

    #[error("permission denied opening GNSS device at {path}")]
    DevicePermissionDenied { path: PathBuf },

    #[error("receiver rejected configuration command {command}")]
    ConfigurationRejected { command: &'static str },

    #[error("no acknowledgement for configuration command {command} within {timeout:?}")]
    ConfigurationTimeout { command: &'static str, timeout: Duration },

    #[error("GNSS device lost: {reason}")]
    DeviceLost {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("NTRIP caster unreachable at {host}:{port}")]
    CasterUnreachable {
        host: String,
        port: u16,
        #[source]
        source: Option<io::Error>,
    },

    #[error("NTRIP caster rejected credentials for mountpoint {mountpoint}")]
    AuthenticationFailed { mountpoint: String },

    #[error("NTRIP mountpoint {mountpoint} not found on caster")]
    MountpointNotFound { mountpoint: String },

    #[error("correction stream silent for {silence:?}, treating as stalled")]
    StreamStalled { silence: Duration },

    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl GnssError {
    /// Whether this failure is expected operational churn.
    ///
    /// Transient errors (device unplugged, stream stalled, caster briefly
    /// unreachable) are logged at `warn` and retried quietly. Persistent
    /// errors require operator attention -- wrong credentials, an invalid
    /// configuration value, a mistyped mountpoint -- and are logged at
    /// `error`, although they too are retried under backoff since the
    /// situation can change externally (a USB replug, a caster config fix).
    pub fn is_transient(&self) -> bool {
        match self {
            GnssError::DeviceLost { .. } => true,
            GnssError::StreamStalled { .. } => true,
            GnssError::CasterUnreachable { .. } => true,
            GnssError::ConfigurationTimeout { .. } => true,
            GnssError::Io { .. } => true,
            GnssError::DeviceNotFound { .. } => false,
            GnssError::DevicePermissionDenied { .. } => false,
            GnssError::ConfigurationRejected { .. } => false,
            GnssError::AuthenticationFailed { .. } => false,
            GnssError::MountpointNotFound { .. } => false,
            GnssError::MalformedFrame { .. } => false,
        }
    }

    /// Helper constructor for a lost device link.
    pub fn device_lost(reason: impl Into<String>) -> Self {
        GnssError::DeviceLost { reason: reason.into(), source: None }
    }

    /// Helper constructor for a lost device link with the underlying I/O error.
    pub fn device_lost_with_source(reason: impl Into<String>, source: io::Error) -> Self {
        GnssError::DeviceLost { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for an unreachable caster.
    pub fn caster_unreachable(host: impl Into<String>, port: u16, source: Option<io::Error>) -> Self {
        GnssError::CasterUnreachable { host: host.into(), port, source }
    }

    /// Helper constructor for a stalled correction stream.
    pub fn stream_stalled(silence: Duration) -> Self {
        GnssError::StreamStalled { silence }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        GnssError::Io { context: context.into(), source }
    }
}

impl From<io::Error> for GnssError {
    fn from(err: io::Error) -> Self {
        GnssError::Io { context: "unspecified I/O operation".to_string(), source: err }
    }
}
