//! Incremental mixed-protocol frame decoder.
//!
//! The receiver interleaves UBX binary frames and NMEA text sentences on one
//! serial stream; neither protocol needs the other disabled. The decoder
//! buffers raw bytes, classifies the buffer head on each step, and hands
//! whichever detector matches the leading byte ownership of the scan. Bytes
//! matching neither start marker are skipped in one `Malformed` span up to
//! the next candidate marker, which bounds resynchronization latency after
//! line noise.

use tracing::trace;

use crate::codec::{nmea, ubx};
use crate::types::frame::{FrameScan, MalformedFrame, MalformedReason, RawFrame};

/// Incremental parser over an append-only byte buffer.
///
/// Feed arbitrary read-sized chunks to [`FrameDecoder::consume`]; complete
/// frames come out, a trailing partial frame stays buffered for the next
/// call. The decoder never partially consumes a frame that might still
/// complete, and always consumes at least one byte for anything it can
/// classify, so the stream cannot livelock.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    malformed: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and drain every complete frame.
    pub fn consume(&mut self, data: &[u8]) -> Vec<RawFrame> {
        self.buf.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            let scan = Self::scan_buffer(&self.buf);
            let Some(frame) = scan.frame else {
                debug_assert_eq!(scan.consumed, 0);
                break;
            };
            self.buf.drain(..scan.consumed);
            if let RawFrame::Malformed(span) = &frame {
                self.malformed += 1;
                trace!(len = span.len, reason = ?span.reason, "skipped malformed span");
            }
            frames.push(frame);
        }
        frames
    }

    /// One scan step against the buffer head.
    ///
    /// Exposed for tests and for callers that manage their own buffer. The
    /// result's `consumed` is how many leading bytes the step used; zero
    /// means the buffer holds only a partial frame prefix (or nothing).
    pub fn scan_buffer(buf: &[u8]) -> FrameScan {
        let Some(&head) = buf.first() else {
            return FrameScan::incomplete();
        };

        match head {
            ubx::SYNC_1 => ubx::scan(buf),
            nmea::START => nmea::scan(buf),
            _ => {
                // Skip to the next byte that could start either protocol.
                let skip = buf[1..]
                    .iter()
                    .position(|&b| b == ubx::SYNC_1 || b == nmea::START)
                    .map(|p| p + 1)
                    .unwrap_or(buf.len());
                FrameScan::frame(
                    RawFrame::Malformed(MalformedFrame {
                        len: skip,
                        reason: MalformedReason::Garbage,
                    }),
                    skip,
                )
            }
        }
    }

    /// Bytes held for a potential partial frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Malformed spans skipped since construction.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}
