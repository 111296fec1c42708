//! Serial receiver session: link, configuration commands, lifecycle.

pub mod commands;
pub mod link;
pub mod session;

pub use commands::{DynamicModel, ResetKind};
pub use link::{SerialLink, SerialPortLink};
pub use session::{DeviceSession, SessionState};
