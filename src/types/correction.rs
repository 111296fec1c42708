//! Correction stream chunks, statistics, and the RTCM3 type scanner.
//!
//! The core never decodes RTCM message content; it only needs the 12-bit
//! message-type number from each frame header to filter the stream down to
//! what the receiver consumes and to keep forwarding statistics. Payloads
//! pass through byte-for-byte -- RTCM semantics require order preservation,
//! so frames are never reordered or re-serialized.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// RTCM3 frame preamble byte.
pub const RTCM_PREAMBLE: u8 = 0xD3;

/// Frame header (preamble + reserved/length) plus trailing CRC24.
const RTCM_OVERHEAD: usize = 3 + 3;

/// A batch of correction bytes ready to forward to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionChunk {
    /// Complete RTCM frames, in caster order.
    pub data: Vec<u8>,
    /// Message types identified in `data`, in order of appearance.
    pub message_types: Vec<u16>,
    /// Monotonically increasing chunk counter.
    pub sequence: u64,
}

/// Forwarding statistics for the correction path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrectionStats {
    pub messages_seen: u64,
    pub messages_forwarded: u64,
    pub bytes_forwarded: u64,
    pub last_message_type: Option<u16>,
    pub type_counts: BTreeMap<u16, u64>,
    pub last_data_at: Option<DateTime<Utc>>,
}

/// Incremental RTCM3 frame scanner with optional type filtering.
///
/// Bytes arrive in arbitrary network-sized chunks; the scanner buffers a
/// trailing partial frame between calls and only ever emits complete frames.
#[derive(Debug)]
pub struct RtcmScanner {
    buf: Vec<u8>,
    filter: Option<BTreeSet<u16>>,
    sequence: u64,
    stats: CorrectionStats,
}

impl RtcmScanner {
    /// `filter = None` forwards every identified frame.
    pub fn new(filter: Option<BTreeSet<u16>>) -> Self {
        Self { buf: Vec::new(), filter, sequence: 0, stats: CorrectionStats::default() }
    }

    /// Feed caster bytes; returns a chunk when at least one complete frame
    /// passed the filter.
    pub fn scan(&mut self, data: &[u8]) -> Option<CorrectionChunk> {
        self.buf.extend_from_slice(data);
        if !data.is_empty() {
            self.stats.last_data_at = Some(Utc::now());
        }

        let mut out = Vec::new();
        let mut types = Vec::new();

        loop {
            // Drop noise ahead of the next preamble.
            match self.buf.iter().position(|&b| b == RTCM_PREAMBLE) {
                Some(0) => {}
                Some(n) => {
                    self.buf.drain(..n);
                }
                None => {
                    self.buf.clear();
                    break;
                }
            }

            if self.buf.len() < RTCM_OVERHEAD {
                break;
            }

            let payload_len =
                usize::from(u16::from_be_bytes([self.buf[1], self.buf[2]]) & 0x03FF);
            let total = RTCM_OVERHEAD + payload_len;
            if payload_len >= 2 {
                let message_type =
                    (u16::from(self.buf[3]) << 4) | (u16::from(self.buf[4]) >> 4);
                // Types live in 1001..=4095; anything else means we synced
                // on a stray 0xD3 inside some other frame's payload.
                if !(1000..=4095).contains(&message_type) {
                    self.buf.drain(..1);
                    continue;
                }

                if self.buf.len() < total {
                    break;
                }

                self.stats.messages_seen += 1;
                let forward =
                    self.filter.as_ref().is_none_or(|allowed| allowed.contains(&message_type));
                if forward {
                    out.extend_from_slice(&self.buf[..total]);
                    types.push(message_type);
                    self.stats.messages_forwarded += 1;
                    self.stats.bytes_forwarded += total as u64;
                    self.stats.last_message_type = Some(message_type);
                    *self.stats.type_counts.entry(message_type).or_insert(0) += 1;
                }
                self.buf.drain(..total);
            } else {
                // A frame too short to carry a type field is not RTCM.
                self.buf.drain(..1);
            }
        }

        if out.is_empty() {
            return None;
        }

        self.sequence += 1;
        Some(CorrectionChunk { data: out, message_types: types, sequence: self.sequence })
    }

    pub fn stats(&self) -> &CorrectionStats {
        &self.stats
    }

    /// Bytes buffered awaiting frame completion.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Human-readable description of common RTCM3 message types, for logs.
pub fn message_description(message_type: u16) -> &'static str {
    match message_type {
        1005 => "Stationary RTK reference station ARP",
        1074 => "GPS MSM4",
        1077 => "GPS MSM7",
        1084 => "GLONASS MSM4",
        1087 => "GLONASS MSM7",
        1094 => "Galileo MSM4",
        1097 => "Galileo MSM7",
        1124 => "BeiDou MSM4",
        1127 => "BeiDou MSM7",
        1230 => "GLONASS L1/L2 code-phase biases",
        _ => "unknown",
    }
}
