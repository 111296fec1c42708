//! Decoded navigation records.
//!
//! [`NavigationSolution`] is the position-velocity-time record decoded from
//! UBX-NAV-PVT; [`FusionSample`] is the high-rate inertial record decoded
//! from UBX-ESF-INS on dead-reckoning-capable receivers. Both are transient:
//! produced per read cycle, consumed by the next pipeline stage, never
//! retained beyond counters.

use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::types::frame::NmeaSentence;

/// UBX-NAV-PVT payload length for the ZED-F9 generation.
const PVT_PAYLOAD_LEN: usize = 92;

/// UBX-ESF-INS payload length.
const INS_PAYLOAD_LEN: usize = 36;

/// Raw PVT fix-type codes, straight from the receiver.
pub mod fix_code {
    pub const NO_FIX: u8 = 0;
    pub const DEAD_RECKONING_ONLY: u8 = 1;
    pub const FIX_2D: u8 = 2;
    pub const FIX_3D: u8 = 3;
    pub const GNSS_PLUS_DEAD_RECKONING: u8 = 4;
    pub const TIME_ONLY: u8 = 5;
}

/// RTK carrier-phase solution status from the PVT flags field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierSolution {
    None,
    Float,
    Fixed,
}

/// A decoded position-velocity-time record.
///
/// Fixed-point wire fields are scaled to SI units on decode: degrees for
/// angles, meters for heights and accuracies, m/s for speeds. Immutable once
/// produced; the fusion aggregator returns an enriched copy rather than
/// mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationSolution {
    /// GPS time of week tag, milliseconds.
    pub itow_ms: u32,
    /// UTC timestamp, present only when the receiver flags date and time valid.
    pub timestamp: Option<DateTime<Utc>>,
    pub lat_deg: f64,
    pub lon_deg: f64,
    /// Height above ellipsoid, meters.
    pub height_m: f64,
    /// Height above mean sea level, meters.
    pub height_msl_m: f64,
    /// Horizontal accuracy estimate, meters.
    pub h_acc_m: f64,
    /// Vertical accuracy estimate, meters.
    pub v_acc_m: f64,
    pub ground_speed_mps: f64,
    /// Heading of motion, degrees.
    pub heading_deg: f64,
    pub satellites: u8,
    /// Raw fix-type code (see [`fix_code`]).
    pub fix_type: u8,
    pub carrier: CarrierSolution,
    /// Differential corrections were applied to this solution.
    pub diff_applied: bool,
    /// Receiver's own validity gate (within DOP and accuracy masks).
    pub gnss_fix_ok: bool,
    /// Inertial enrichment attached by the fusion aggregator.
    pub fusion: Option<FusionData>,
}

impl NavigationSolution {
    /// Decode a UBX-NAV-PVT payload. Returns `None` for truncated payloads.
    pub fn from_pvt_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < PVT_PAYLOAD_LEN {
            return None;
        }

        let valid = payload[11];
        let fix_type = payload[20];
        let flags = payload[21];

        // validDate + validTime must both be set before the calendar fields
        // mean anything.
        let timestamp = if valid & 0x03 == 0x03 {
            let year = i32::from(read_u16(payload, 4));
            Utc.with_ymd_and_hms(
                year,
                u32::from(payload[6]),
                u32::from(payload[7]),
                u32::from(payload[8]),
                u32::from(payload[9]),
                u32::from(payload[10]),
            )
            .single()
        } else {
            None
        };

        let carrier = match (flags >> 6) & 0x03 {
            1 => CarrierSolution::Float,
            2 => CarrierSolution::Fixed,
            _ => CarrierSolution::None,
        };

        Some(Self {
            itow_ms: read_u32(payload, 0),
            timestamp,
            lon_deg: f64::from(read_i32(payload, 24)) * 1e-7,
            lat_deg: f64::from(read_i32(payload, 28)) * 1e-7,
            height_m: f64::from(read_i32(payload, 32)) * 1e-3,
            height_msl_m: f64::from(read_i32(payload, 36)) * 1e-3,
            h_acc_m: f64::from(read_u32(payload, 40)) * 1e-3,
            v_acc_m: f64::from(read_u32(payload, 44)) * 1e-3,
            ground_speed_mps: f64::from(read_i32(payload, 60)) * 1e-3,
            heading_deg: f64::from(read_i32(payload, 64)) * 1e-5,
            satellites: payload[23],
            fix_type,
            carrier,
            diff_applied: flags & 0x02 != 0,
            gnss_fix_ok: flags & 0x01 != 0,
            fusion: None,
        })
    }

    /// Whether the solution carries a usable altitude.
    pub fn has_valid_altitude(&self) -> bool {
        matches!(self.fix_type, fix_code::FIX_3D | fix_code::GNSS_PLUS_DEAD_RECKONING)
    }
}

/// Inertial enrichment merged into a [`NavigationSolution`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionData {
    /// Compensated angular rate per body axis, deg/s.
    pub ang_rate_dps: [f64; 3],
    pub ang_rate_valid: [bool; 3],
    /// Compensated acceleration per body axis, m/s².
    pub accel_mps2: [f64; 3],
    pub accel_valid: [bool; 3],
    /// Number of fresh samples averaged into this enrichment.
    pub samples: usize,
}

/// A decoded UBX-ESF-INS record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionSample {
    pub itow_ms: u32,
    /// Compensated angular rate per body axis, deg/s.
    pub ang_rate_dps: [f64; 3],
    pub ang_rate_valid: [bool; 3],
    /// Compensated acceleration per body axis, m/s².
    pub accel_mps2: [f64; 3],
    pub accel_valid: [bool; 3],
    /// Monotonic arrival time, used for the freshness window.
    pub received_at: Instant,
}

impl FusionSample {
    /// Decode a UBX-ESF-INS payload. Returns `None` for truncated payloads
    /// or an unknown message version.
    pub fn from_ins_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < INS_PAYLOAD_LEN {
            return None;
        }

        let bitfield = read_u32(payload, 0);
        if bitfield & 0xFF != 1 {
            return None;
        }

        Some(Self {
            itow_ms: read_u32(payload, 8),
            ang_rate_dps: [
                f64::from(read_i32(payload, 12)) * 1e-3,
                f64::from(read_i32(payload, 16)) * 1e-3,
                f64::from(read_i32(payload, 20)) * 1e-3,
            ],
            ang_rate_valid: [
                bitfield & (1 << 8) != 0,
                bitfield & (1 << 9) != 0,
                bitfield & (1 << 10) != 0,
            ],
            accel_mps2: [
                f64::from(read_i32(payload, 24)) * 1e-2,
                f64::from(read_i32(payload, 28)) * 1e-2,
                f64::from(read_i32(payload, 32)) * 1e-2,
            ],
            accel_valid: [
                bitfield & (1 << 11) != 0,
                bitfield & (1 << 12) != 0,
                bitfield & (1 << 13) != 0,
            ],
            received_at: Instant::now(),
        })
    }
}

/// Position echo decoded from an NMEA GGA sentence.
///
/// Used as a fallback when the receiver is emitting NMEA but UBX output has
/// not been (re)enabled yet, e.g. right after a factory reset.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaFix {
    pub lat_deg: f64,
    pub lon_deg: f64,
    /// GGA fix quality: 0 invalid, 1 GPS, 2 DGPS, 4 RTK fixed, 5 RTK float.
    pub quality: u8,
    pub satellites: u8,
    pub hdop: f64,
    /// Antenna altitude above mean sea level, meters.
    pub altitude_msl_m: f64,
}

impl GgaFix {
    /// Parse the data fields of a GGA sentence.
    pub fn from_sentence(sentence: &NmeaSentence) -> Option<Self> {
        if sentence.sentence != "GGA" || sentence.fields.len() < 9 {
            return None;
        }

        let lat_deg = degrees_from_dm(&sentence.fields[1], &sentence.fields[2])?;
        let lon_deg = degrees_from_dm(&sentence.fields[3], &sentence.fields[4])?;
        let quality: u8 = sentence.fields[5].parse().ok()?;
        let satellites: u8 = sentence.fields[6].parse().ok()?;
        let hdop: f64 = sentence.fields[7].parse().unwrap_or(99.9);
        let altitude_msl_m: f64 = sentence.fields[8].parse().ok()?;

        Some(Self { lat_deg, lon_deg, quality, satellites, hdop, altitude_msl_m })
    }
}

/// Convert NMEA `(d)ddmm.mmmm` plus hemisphere into signed decimal degrees.
fn degrees_from_dm(value: &str, hemisphere: &str) -> Option<f64> {
    if value.len() < 4 {
        return None;
    }
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 3 {
        return None;
    }
    let degrees: f64 = value[..dot - 2].parse().ok()?;
    let minutes: f64 = value[dot - 2..].parse().ok()?;
    let unsigned = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Some(unsigned),
        "S" | "W" => Some(-unsigned),
        _ => None,
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
