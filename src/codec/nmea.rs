//! NMEA 0183 sentence framing.
//!
//! Wire format: `$` start marker, comma-delimited fields, an optional `*`
//! followed by two hex digits (XOR of every byte between `$` and `*`), then
//! CRLF. Sentences longer than [`MAX_SENTENCE_LEN`] without a terminator are
//! treated as noise so a stuck marker byte cannot grow the buffer without
//! bound.

use crate::types::frame::{
    FrameScan, MalformedFrame, MalformedReason, NmeaSentence, RawFrame,
};

/// Start-of-sentence marker.
pub const START: u8 = b'$';

/// Maximum bytes from `$` to CRLF inclusive. The NMEA limit is 82; the F9
/// emits slightly longer proprietary sentences, so allow headroom.
pub(crate) const MAX_SENTENCE_LEN: usize = 100;

/// XOR checksum over sentence bytes (between `$` and `*`, exclusive).
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Scan a buffer whose first byte is [`START`].
pub(crate) fn scan(buf: &[u8]) -> FrameScan {
    debug_assert_eq!(buf.first(), Some(&START));

    let window = &buf[..buf.len().min(MAX_SENTENCE_LEN)];
    let Some(cr) = window.windows(2).position(|w| w == b"\r\n") else {
        if buf.len() >= MAX_SENTENCE_LEN {
            return FrameScan::frame(
                RawFrame::Malformed(MalformedFrame {
                    len: MAX_SENTENCE_LEN,
                    reason: MalformedReason::NmeaUnterminated,
                }),
                MAX_SENTENCE_LEN,
            );
        }
        return FrameScan::incomplete();
    };

    let consumed = cr + 2;
    let body = &buf[1..cr]; // between '$' and CR

    let malformed = |reason| {
        FrameScan::frame(
            RawFrame::Malformed(MalformedFrame { len: consumed, reason }),
            consumed,
        )
    };

    // Split off and verify the optional checksum field.
    let data = if body.len() >= 3 && body[body.len() - 3] == b'*' {
        let data = &body[..body.len() - 3];
        let Some(expected) = parse_hex_pair(&body[body.len() - 2..]) else {
            return malformed(MalformedReason::NmeaChecksum);
        };
        if checksum(data) != expected {
            return malformed(MalformedReason::NmeaChecksum);
        }
        data
    } else {
        body
    };

    let Ok(text) = std::str::from_utf8(data) else {
        return malformed(MalformedReason::NmeaChecksum);
    };

    let mut parts = text.split(',');
    let address = parts.next().unwrap_or_default();
    if address.len() < 3 || !address.is_ascii() {
        return malformed(MalformedReason::NmeaChecksum);
    }

    // Proprietary sentences use a single 'P' talker; standard ones a
    // two-character talker plus three-character type.
    let (talker, sentence) = if let Some(rest) = address.strip_prefix('P') {
        ("P".to_string(), rest.to_string())
    } else {
        (address[..2].to_string(), address[2..].to_string())
    };

    let fields = parts.map(str::to_string).collect();
    FrameScan::frame(
        RawFrame::Nmea(NmeaSentence { talker, sentence, fields }),
        consumed,
    )
}

fn parse_hex_pair(digits: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(digits).ok()?;
    u8::from_str_radix(text, 16).ok()
}
