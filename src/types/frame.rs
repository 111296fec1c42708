//! Raw frame types produced by the incremental stream decoder.

use crate::types::solution::{FusionSample, NavigationSolution};

/// UBX class for navigation results.
pub const CLASS_NAV: u8 = 0x01;
/// UBX class for acknowledgements.
pub const CLASS_ACK: u8 = 0x05;
/// UBX class for configuration input.
pub const CLASS_CFG: u8 = 0x06;
/// UBX class for external sensor fusion.
pub const CLASS_ESF: u8 = 0x10;

/// UBX-NAV-PVT message id.
pub const ID_NAV_PVT: u8 = 0x07;
/// UBX-ACK-NAK message id.
pub const ID_ACK_NAK: u8 = 0x00;
/// UBX-ACK-ACK message id.
pub const ID_ACK_ACK: u8 = 0x01;
/// UBX-ESF-INS message id.
pub const ID_ESF_INS: u8 = 0x15;

/// One fully framed, checksum-validated message pulled off the byte stream,
/// or a span of bytes the decoder had to skip to regain sync.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    Ubx(UbxFrame),
    Nmea(NmeaSentence),
    Malformed(MalformedFrame),
}

impl RawFrame {
    pub fn is_malformed(&self) -> bool {
        matches!(self, RawFrame::Malformed(_))
    }
}

/// Result of one decoder scan step: at most one frame, plus the count of
/// leading buffer bytes consumed producing it.
///
/// Invariant: `consumed > 0` whenever `frame` is `Some`. A `(None, 0)`
/// result means the buffer holds only a partial frame prefix and the caller
/// must wait for more input.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameScan {
    pub frame: Option<RawFrame>,
    pub consumed: usize,
}

impl FrameScan {
    pub(crate) fn incomplete() -> Self {
        Self { frame: None, consumed: 0 }
    }

    pub(crate) fn frame(frame: RawFrame, consumed: usize) -> Self {
        debug_assert!(consumed > 0, "a produced frame must consume bytes");
        Self { frame: Some(frame), consumed }
    }
}

/// A checksum-valid UBX binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbxFrame {
    pub class: u8,
    pub id: u8,
    pub payload: Vec<u8>,
}

impl UbxFrame {
    /// Dispatch the frame through the decode table keyed by (class, id).
    ///
    /// Unknown keys are not an error; the stream routinely carries message
    /// types this core has no use for.
    pub fn record(&self) -> UbxRecord {
        match (self.class, self.id) {
            (CLASS_NAV, ID_NAV_PVT) => NavigationSolution::from_pvt_payload(&self.payload)
                .map(UbxRecord::NavPvt)
                .unwrap_or(UbxRecord::Unrecognized { class: self.class, id: self.id }),
            (CLASS_ESF, ID_ESF_INS) => FusionSample::from_ins_payload(&self.payload)
                .map(UbxRecord::EsfIns)
                .unwrap_or(UbxRecord::Unrecognized { class: self.class, id: self.id }),
            (CLASS_ACK, ID_ACK_ACK) if self.payload.len() >= 2 => {
                UbxRecord::AckAck { class: self.payload[0], id: self.payload[1] }
            }
            (CLASS_ACK, ID_ACK_NAK) if self.payload.len() >= 2 => {
                UbxRecord::AckNak { class: self.payload[0], id: self.payload[1] }
            }
            _ => UbxRecord::Unrecognized { class: self.class, id: self.id },
        }
    }
}

/// Decoded view of a [`UbxFrame`].
#[derive(Debug, Clone, PartialEq)]
pub enum UbxRecord {
    NavPvt(NavigationSolution),
    EsfIns(FusionSample),
    /// Receiver acknowledged the configuration frame with this class/id.
    AckAck { class: u8, id: u8 },
    /// Receiver rejected the configuration frame with this class/id.
    AckNak { class: u8, id: u8 },
    Unrecognized { class: u8, id: u8 },
}

/// A terminated NMEA sentence with a valid (or absent) checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmeaSentence {
    /// Talker prefix, e.g. `GN` (or `P` for proprietary sentences).
    pub talker: String,
    /// Sentence type, e.g. `GGA`.
    pub sentence: String,
    /// Comma-separated data fields, address excluded.
    pub fields: Vec<String>,
}

/// A span of bytes skipped to regain frame sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedFrame {
    /// Number of bytes the skip covers.
    pub len: usize,
    pub reason: MalformedReason,
}

/// Why a span of bytes failed to frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// UBX checksum mismatch; only the sync bytes are skipped so a valid
    /// frame starting inside the corrupt span is still found.
    UbxChecksum,
    /// First sync byte present but second absent.
    UbxSync,
    /// Claimed payload length exceeds the protocol maximum.
    UbxLength,
    /// NMEA `*hh` checksum mismatch.
    NmeaChecksum,
    /// Sentence ran past the maximum length without a CRLF terminator.
    NmeaUnterminated,
    /// Bytes matching no protocol start marker.
    Garbage,
}
