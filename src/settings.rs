//! Pre-validated runtime settings.
//!
//! The core does not parse configuration files. An external collaborator
//! (add-on supervisor, CLI, service wrapper) validates ranges and hands the
//! core an immutable [`Settings`] value; the only validation the core
//! performs afterwards is the receiver's own rejection of a derived command,
//! surfaced as [`crate::GnssError::ConfigurationRejected`].

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;

/// Complete settings structure handed to [`crate::RtkLink::start`].
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub device: DeviceSettings,
    #[serde(default)]
    pub correction: CorrectionSettings,
    #[serde(default)]
    pub downstream: DownstreamSettings,
}

impl Settings {
    /// Nominal interval between navigation solutions.
    pub fn update_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.device.update_rate_hz.max(1)))
    }
}

/// Receiver hardware variant.
///
/// The F9R carries an IMU and supports sensor-fusion dead reckoning; the
/// F9P does not. The variant selects the dynamic platform model and whether
/// fusion messages are enabled during configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceVariant {
    ZedF9p,
    ZedF9r,
}

/// GNSS constellations the receiver should track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constellation {
    Gps,
    Glonass,
    Galileo,
    Beidou,
}

/// Serial device settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub path: String,

    #[serde(default = "default_baud")]
    pub baud_rate: u32,

    #[serde(default = "default_variant")]
    pub variant: DeviceVariant,

    /// Enable sensor-fusion dead reckoning (F9R only).
    #[serde(default)]
    pub dead_reckoning: bool,

    /// Navigation solution rate in Hz.
    #[serde(default = "default_update_rate")]
    pub update_rate_hz: u32,

    #[serde(default = "default_constellations")]
    pub constellations: BTreeSet<Constellation>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud(),
            variant: default_variant(),
            dead_reckoning: false,
            update_rate_hz: default_update_rate(),
            constellations: default_constellations(),
        }
    }
}

/// NTRIP correction stream settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_caster_port")]
    pub port: u16,

    #[serde(default)]
    pub mountpoint: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// RTCM message types forwarded to the receiver. `None` forwards the
    /// raw stream unfiltered.
    #[serde(default = "default_rtcm_filter")]
    pub filter_message_types: Option<BTreeSet<u16>>,

    /// Seconds of caster silence before the stream counts as stalled.
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_secs: u64,
}

impl CorrectionSettings {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs)
    }
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: default_caster_port(),
            mountpoint: String::new(),
            username: None,
            password: None,
            filter_message_types: default_rtcm_filter(),
            silence_timeout_secs: default_silence_timeout(),
        }
    }
}

/// Downstream consumer endpoint. The core carries these opaquely for the
/// publish-sink implementation; it never dials the URL itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownstreamSettings {
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub token: String,
}

fn default_baud() -> u32 {
    38_400
}

fn default_variant() -> DeviceVariant {
    DeviceVariant::ZedF9p
}

fn default_update_rate() -> u32 {
    1
}

fn default_caster_port() -> u16 {
    2101
}

fn default_silence_timeout() -> u64 {
    30
}

fn default_constellations() -> BTreeSet<Constellation> {
    BTreeSet::from([
        Constellation::Gps,
        Constellation::Glonass,
        Constellation::Galileo,
        Constellation::Beidou,
    ])
}

/// RTCM types a ZED-F9 rover consumes: stationary reference ARP plus the
/// MSM7 observation sets and GLONASS code-phase biases.
fn default_rtcm_filter() -> Option<BTreeSet<u16>> {
    Some(BTreeSet::from([1005, 1077, 1087, 1097, 1127, 1230]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_receiver_conventions() {
        let device = DeviceSettings::default();
        assert_eq!(device.baud_rate, 38_400);
        assert_eq!(device.update_rate_hz, 1);
        assert_eq!(device.constellations.len(), 4);
        assert!(!device.dead_reckoning);

        let correction = CorrectionSettings::default();
        assert_eq!(correction.port, 2101);
        assert_eq!(correction.silence_timeout(), Duration::from_secs(30));
        let filter = correction.filter_message_types.expect("default filter present");
        assert!(filter.contains(&1005));
        assert!(filter.contains(&1097));
    }

    #[test]
    fn update_period_follows_rate() {
        let mut settings = Settings {
            device: DeviceSettings::default(),
            correction: CorrectionSettings::default(),
            downstream: DownstreamSettings::default(),
        };
        assert_eq!(settings.update_period(), Duration::from_secs(1));

        settings.device.update_rate_hz = 5;
        assert_eq!(settings.update_period(), Duration::from_millis(200));

        // A zero rate must not divide by zero.
        settings.device.update_rate_hz = 0;
        assert_eq!(settings.update_period(), Duration::from_secs(1));
    }

    #[test]
    fn deserializes_from_external_options() {
        let raw = r#"{
            "device": {
                "path": "/dev/ttyACM0",
                "baud_rate": 115200,
                "variant": "zed-f9r",
                "dead_reckoning": true,
                "update_rate_hz": 10,
                "constellations": ["gps", "galileo"]
            },
            "correction": {
                "enabled": true,
                "host": "caster.example.net",
                "mountpoint": "MOUNT1",
                "username": "rover",
                "password": "secret"
            },
            "downstream": {
                "base_url": "http://supervisor/core",
                "token": "abc123"
            }
        }"#;

        let settings: Settings = serde_json::from_str(raw).expect("settings should deserialize");
        assert_eq!(settings.device.variant, DeviceVariant::ZedF9r);
        assert!(settings.device.dead_reckoning);
        assert_eq!(settings.device.update_rate_hz, 10);
        assert_eq!(settings.device.constellations.len(), 2);
        assert!(settings.correction.enabled);
        assert_eq!(settings.correction.port, 2101);
        assert_eq!(settings.downstream.base_url, "http://supervisor/core");
    }
}
