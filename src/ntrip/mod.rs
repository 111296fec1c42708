//! NTRIP correction-stream client.

pub mod client;

pub use client::{CasterState, CorrectionClient, CorrectionStream};
