//! UBX binary framing.
//!
//! Wire format: `B5 62` sync, class (1), id (1), payload length (2, little
//! endian), payload, then a two-byte 8-bit Fletcher checksum computed over
//! class through payload. Sync bytes are excluded from the checksum.

use crate::types::frame::{
    FrameScan, MalformedFrame, MalformedReason, RawFrame, UbxFrame,
};

/// First UBX sync byte.
pub const SYNC_1: u8 = 0xB5;
/// Second UBX sync byte.
pub const SYNC_2: u8 = 0x62;

/// Sync + class + id + length.
pub(crate) const HEADER_LEN: usize = 6;
/// Trailing checksum bytes.
pub(crate) const CHECKSUM_LEN: usize = 2;

/// Longest payload this core accepts. Generous against every message the
/// F9 emits at navigation rate; a larger claimed length means the length
/// field itself is corrupt.
pub(crate) const MAX_PAYLOAD_LEN: usize = 2000;

/// 8-bit Fletcher checksum accumulator.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Checksum {
    a: u8,
    b: u8,
}

impl Checksum {
    pub(crate) const fn new() -> Self {
        Self { a: 0, b: 0 }
    }

    pub(crate) fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.a = self.a.wrapping_add(byte);
            self.b = self.b.wrapping_add(self.a);
        }
    }

    pub(crate) const fn result(self) -> (u8, u8) {
        (self.a, self.b)
    }
}

/// Compute the checksum pair over class/id/length/payload bytes.
pub(crate) fn checksum_over(bytes: &[u8]) -> (u8, u8) {
    let mut calc = Checksum::new();
    calc.update(bytes);
    calc.result()
}

/// Encode a complete UBX frame ready for the wire.
pub fn encode(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    frame.extend_from_slice(&[SYNC_1, SYNC_2, class, id]);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    let (ck_a, ck_b) = checksum_over(&frame[2..]);
    frame.extend_from_slice(&[ck_a, ck_b]);
    frame
}

/// Scan a buffer whose first byte is [`SYNC_1`].
///
/// On checksum mismatch only the two sync bytes are consumed, so a valid
/// frame beginning inside the corrupt span is still found on the next pass;
/// discarding the whole claimed frame would let one flipped length byte eat
/// an arbitrary stretch of good data.
pub(crate) fn scan(buf: &[u8]) -> FrameScan {
    debug_assert_eq!(buf.first(), Some(&SYNC_1));

    if buf.len() < 2 {
        return FrameScan::incomplete();
    }
    if buf[1] != SYNC_2 {
        return FrameScan::frame(
            RawFrame::Malformed(MalformedFrame { len: 1, reason: MalformedReason::UbxSync }),
            1,
        );
    }
    if buf.len() < HEADER_LEN {
        return FrameScan::incomplete();
    }

    let payload_len = usize::from(u16::from_le_bytes([buf[4], buf[5]]));
    if payload_len > MAX_PAYLOAD_LEN {
        return FrameScan::frame(
            RawFrame::Malformed(MalformedFrame { len: 2, reason: MalformedReason::UbxLength }),
            2,
        );
    }

    let total = HEADER_LEN + payload_len + CHECKSUM_LEN;
    if buf.len() < total {
        return FrameScan::incomplete();
    }

    let (ck_a, ck_b) = checksum_over(&buf[2..HEADER_LEN + payload_len]);
    if (ck_a, ck_b) != (buf[total - 2], buf[total - 1]) {
        return FrameScan::frame(
            RawFrame::Malformed(MalformedFrame { len: 2, reason: MalformedReason::UbxChecksum }),
            2,
        );
    }

    let frame = UbxFrame {
        class: buf[2],
        id: buf[3],
        payload: buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec(),
    };
    FrameScan::frame(RawFrame::Ubx(frame), total)
}
