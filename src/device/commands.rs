//! UBX configuration frame builders.
//!
//! Each builder returns a [`Command`]: the encoded frame plus the class/id
//! the receiver will echo in its ACK-ACK/ACK-NAK response, and a name for
//! error reporting. The configuration sequence mirrors what a ZED-F9 rover
//! needs for RTK work: solution rate, constellations, message enables,
//! platform model, then persist.

use crate::codec::ubx;
use crate::settings::{Constellation, DeviceSettings, DeviceVariant};
use crate::types::frame::{CLASS_CFG, CLASS_ESF, CLASS_NAV, ID_ESF_INS, ID_NAV_PVT};

const ID_CFG_MSG: u8 = 0x01;
const ID_CFG_RST: u8 = 0x04;
const ID_CFG_RATE: u8 = 0x08;
const ID_CFG_CFG: u8 = 0x09;
const ID_CFG_NAV5: u8 = 0x24;
const ID_CFG_GNSS: u8 = 0x3E;

/// One configuration frame awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct Command {
    /// Mnemonic for error messages, e.g. `CFG-RATE`.
    pub name: &'static str,
    /// Class echoed in the receiver's acknowledgement.
    pub class: u8,
    /// Id echoed in the receiver's acknowledgement.
    pub id: u8,
    /// Encoded frame, sync bytes through checksum.
    pub frame: Vec<u8>,
}

impl Command {
    fn new(name: &'static str, class: u8, id: u8, payload: &[u8]) -> Self {
        Self { name, class, id, frame: ubx::encode(class, id, payload) }
    }
}

/// Dynamic platform model for CFG-NAV5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DynamicModel {
    Portable = 0,
    Stationary = 2,
    Pedestrian = 3,
    Automotive = 4,
}

/// Receiver reset severity for CFG-RST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Keep all aiding data.
    Hot,
    /// Discard ephemeris.
    Warm,
    /// Discard everything, full cold start.
    Cold,
}

/// Full configuration sequence for the given device settings.
pub fn configuration_sequence(settings: &DeviceSettings) -> Vec<Command> {
    let mut commands = vec![
        cfg_rate(settings.update_rate_hz),
        cfg_gnss(settings),
        cfg_msg(CLASS_NAV, ID_NAV_PVT, 1),
    ];

    if settings.dead_reckoning && settings.variant == DeviceVariant::ZedF9r {
        commands.push(cfg_msg(CLASS_ESF, ID_ESF_INS, 1));
    }

    let model = match settings.variant {
        DeviceVariant::ZedF9r => DynamicModel::Automotive,
        DeviceVariant::ZedF9p => DynamicModel::Portable,
    };
    commands.push(cfg_nav5(model));
    commands.push(cfg_cfg_save());
    commands
}

/// CFG-RATE: navigation measurement and solution rate.
pub fn cfg_rate(update_rate_hz: u32) -> Command {
    let meas_rate_ms = (1000 / update_rate_hz.max(1)).clamp(25, 1000) as u16;
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&meas_rate_ms.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes()); // navRate: every measurement
    payload.extend_from_slice(&1u16.to_le_bytes()); // timeRef: GPS time
    Command::new("CFG-RATE", CLASS_CFG, ID_CFG_RATE, &payload)
}

/// CFG-MSG: per-port message rate, enabling `class`/`id` on UART1 and USB.
pub fn cfg_msg(class: u8, id: u8, rate: u8) -> Command {
    // Rates for ports I2C, UART1, UART2, USB, SPI, reserved.
    let payload = [class, id, 0, rate, 0, rate, 0, 0];
    Command::new("CFG-MSG", CLASS_CFG, ID_CFG_MSG, &payload)
}

/// CFG-NAV5: apply the dynamic platform model.
pub fn cfg_nav5(model: DynamicModel) -> Command {
    let mut payload = [0u8; 36];
    payload[..2].copy_from_slice(&0x0001u16.to_le_bytes()); // mask: dyn model only
    payload[2] = model as u8;
    Command::new("CFG-NAV5", CLASS_CFG, ID_CFG_NAV5, &payload)
}

/// CFG-GNSS: constellation enables.
///
/// One config block per major constellation, enabled according to settings.
/// QZSS stays enabled alongside GPS per u-blox guidance; SBAS is left off
/// since RTK corrections supersede it.
pub fn cfg_gnss(settings: &DeviceSettings) -> Command {
    // (gnssId, resTrkCh, maxTrkCh, sigCfgMask, constellation)
    let blocks: [(u8, u8, u8, u32, Option<Constellation>); 5] = [
        (0, 8, 16, 0x01, Some(Constellation::Gps)),
        (2, 4, 8, 0x01, Some(Constellation::Galileo)),
        (3, 8, 16, 0x01, Some(Constellation::Beidou)),
        (5, 0, 3, 0x01, None), // QZSS follows GPS
        (6, 8, 14, 0x01, Some(Constellation::Glonass)),
    ];

    let gps_enabled = settings.constellations.contains(&Constellation::Gps);
    let mut payload = Vec::with_capacity(4 + blocks.len() * 8);
    payload.extend_from_slice(&[0, 0, 0xFF, blocks.len() as u8]);

    for (gnss_id, res_trk, max_trk, sig_mask, constellation) in blocks {
        let enabled = match constellation {
            Some(c) => settings.constellations.contains(&c),
            None => gps_enabled,
        };
        let flags: u32 = u32::from(enabled) | (sig_mask << 16);
        payload.extend_from_slice(&[gnss_id, res_trk, max_trk, 0]);
        payload.extend_from_slice(&flags.to_le_bytes());
    }

    Command::new("CFG-GNSS", CLASS_CFG, ID_CFG_GNSS, &payload)
}

/// CFG-CFG: persist the running configuration to battery-backed RAM/flash.
pub fn cfg_cfg_save() -> Command {
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&0u32.to_le_bytes()); // clearMask
    payload.extend_from_slice(&0x0000_001Fu32.to_le_bytes()); // saveMask: all sections
    payload.extend_from_slice(&0u32.to_le_bytes()); // loadMask
    Command::new("CFG-CFG", CLASS_CFG, ID_CFG_CFG, &payload)
}

/// CFG-RST: software reset. Not acknowledged by the receiver.
pub fn cfg_rst(kind: ResetKind) -> Command {
    let nav_bbr_mask: u16 = match kind {
        ResetKind::Hot => 0x0000,
        ResetKind::Warm => 0x0001,
        ResetKind::Cold => 0xFFFF,
    };
    let mut payload = Vec::with_capacity(4);
    payload.extend_from_slice(&nav_bbr_mask.to_le_bytes());
    payload.push(0x02); // controlled software reset
    payload.push(0);
    Command::new("CFG-RST", CLASS_CFG, ID_CFG_RST, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameDecoder;
    use crate::types::frame::RawFrame;

    fn decode_one(frame: &[u8]) -> crate::types::frame::UbxFrame {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.consume(frame);
        assert_eq!(frames.len(), 1);
        match frames.into_iter().next().unwrap() {
            RawFrame::Ubx(ubx) => ubx,
            other => panic!("expected UBX frame, got {other:?}"),
        }
    }

    #[test]
    fn every_command_frame_passes_the_decoder() {
        let settings = DeviceSettings::default();
        for command in configuration_sequence(&settings) {
            let decoded = decode_one(&command.frame);
            assert_eq!(decoded.class, command.class, "{}", command.name);
            assert_eq!(decoded.id, command.id, "{}", command.name);
        }
    }

    #[test]
    fn rate_command_converts_hz_to_milliseconds() {
        let cmd = cfg_rate(5);
        let decoded = decode_one(&cmd.frame);
        assert_eq!(u16::from_le_bytes([decoded.payload[0], decoded.payload[1]]), 200);

        // 1 Hz is the floor; a zero rate must not divide by zero.
        let decoded = decode_one(&cfg_rate(0).frame);
        assert_eq!(u16::from_le_bytes([decoded.payload[0], decoded.payload[1]]), 1000);

        // The receiver caps out at 40 Hz; we clamp the interval at 25 ms.
        let decoded = decode_one(&cfg_rate(100).frame);
        assert_eq!(u16::from_le_bytes([decoded.payload[0], decoded.payload[1]]), 25);
    }

    #[test]
    fn message_enable_targets_uart1_and_usb() {
        let cmd = cfg_msg(CLASS_NAV, ID_NAV_PVT, 1);
        let decoded = decode_one(&cmd.frame);
        assert_eq!(decoded.payload[0], CLASS_NAV);
        assert_eq!(decoded.payload[1], ID_NAV_PVT);
        assert_eq!(decoded.payload[3], 1); // UART1
        assert_eq!(decoded.payload[5], 1); // USB
        assert_eq!(decoded.payload[4], 0); // UART2 stays quiet
    }

    #[test]
    fn fusion_messages_only_enabled_for_dead_reckoning_f9r() {
        let mut settings = DeviceSettings::default();
        let has_esf = |cmds: &[Command]| {
            cmds.iter().any(|c| c.frame.get(6) == Some(&CLASS_ESF))
        };

        assert!(!has_esf(&configuration_sequence(&settings)));

        settings.dead_reckoning = true;
        assert!(!has_esf(&configuration_sequence(&settings)), "F9P cannot do fusion");

        settings.variant = DeviceVariant::ZedF9r;
        assert!(has_esf(&configuration_sequence(&settings)));
    }

    #[test]
    fn f9r_selects_automotive_model() {
        let mut settings = DeviceSettings::default();
        settings.variant = DeviceVariant::ZedF9r;
        let nav5 = configuration_sequence(&settings)
            .into_iter()
            .find(|c| c.name == "CFG-NAV5")
            .unwrap();
        let decoded = decode_one(&nav5.frame);
        assert_eq!(decoded.payload[2], DynamicModel::Automotive as u8);
    }

    #[test]
    fn gnss_blocks_follow_constellation_settings() {
        let mut settings = DeviceSettings::default();
        settings.constellations =
            std::collections::BTreeSet::from([Constellation::Gps, Constellation::Galileo]);

        let decoded = decode_one(&cfg_gnss(&settings).frame);
        assert_eq!(decoded.payload[3], 5); // five config blocks

        // Block layout: 4 header bytes then 8 bytes per block; the enable
        // bit is the low bit of each block's flags word.
        let enabled: Vec<(u8, bool)> = decoded.payload[4..]
            .chunks(8)
            .map(|block| (block[0], block[4] & 0x01 != 0))
            .collect();
        assert_eq!(
            enabled,
            vec![(0, true), (2, true), (3, false), (5, true), (6, false)]
        );
    }

    #[test]
    fn reset_masks_match_severity() {
        let hot = decode_one(&cfg_rst(ResetKind::Hot).frame);
        assert_eq!(&hot.payload[..2], &[0x00, 0x00]);
        let cold = decode_one(&cfg_rst(ResetKind::Cold).frame);
        assert_eq!(&cold.payload[..2], &[0xFF, 0xFF]);
        assert_eq!(cold.payload[2], 0x02);
    }
}
