//! Wire-protocol framing and the incremental stream decoder.

pub mod decoder;
pub mod nmea;
pub mod ubx;

pub use decoder::FrameDecoder;
