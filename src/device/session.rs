//! Receiver session: open, configure, then stream.
//!
//! The session owns the serial link for its whole life. `open` and
//! `configure` run to completion before the read loop starts; the loop
//! itself is a blocking function intended for `tokio::task::spawn_blocking`,
//! with the orchestrator on the async side of the channels. On any read or
//! write failure the session reports `DeviceLost` upward and stops --
//! reconnect policy belongs to the orchestrator so device and caster
//! supervision share one backoff implementation.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::FrameDecoder;
use crate::device::commands::{self, Command, ResetKind};
use crate::device::link::{SerialLink, SerialPortLink};
use crate::error::{GnssError, Result};
use crate::settings::DeviceSettings;
use crate::types::frame::{RawFrame, UbxRecord};

/// Serial read timeout; doubles as the loop's pacing tick.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How long to wait for one configuration acknowledgement.
const ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Read buffer size; comfortably above one navigation epoch of output.
const READ_BUF_LEN: usize = 4096;

/// Connection lifecycle, owned and mutated only by the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Configuring,
    Streaming,
    /// Link still open but misbehaving (e.g. a command went unacknowledged
    /// after streaming started).
    Degraded,
}

/// An open receiver session.
pub struct DeviceSession {
    link: Box<dyn SerialLink>,
    decoder: FrameDecoder,
    state: SessionState,
    ack_timeout: Duration,
}

impl DeviceSession {
    /// Open the configured serial device.
    pub fn open(settings: &DeviceSettings) -> Result<Self> {
        let link = SerialPortLink::open(&settings.path, settings.baud_rate, READ_TIMEOUT)?;
        Ok(Self::with_link(Box::new(link)))
    }

    /// Build a session over an arbitrary link. Test seam.
    pub fn with_link(link: Box<dyn SerialLink>) -> Self {
        Self {
            link,
            decoder: FrameDecoder::new(),
            state: SessionState::Connecting,
            ack_timeout: ACK_TIMEOUT,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Send the full configuration sequence, waiting for the receiver's
    /// acknowledgement after each command.
    ///
    /// A NAK means the receiver understood and refused the command (an
    /// invalid option value). Silence while other traffic flows means the
    /// command was ignored, which is treated the same way. Total silence
    /// means a dead link and maps to `ConfigurationTimeout` instead.
    pub fn configure(&mut self, settings: &DeviceSettings) -> Result<()> {
        self.state = SessionState::Configuring;
        info!(
            rate_hz = settings.update_rate_hz,
            variant = ?settings.variant,
            dead_reckoning = settings.dead_reckoning,
            "configuring receiver"
        );

        for command in commands::configuration_sequence(settings) {
            self.send_command(&command)?;
            self.wait_for_ack(&command)?;
            debug!(command = command.name, "acknowledged");
        }

        self.state = SessionState::Streaming;
        info!("receiver configuration complete");
        Ok(())
    }

    /// Issue a software reset. The receiver reboots without acknowledging,
    /// so the session is left disconnected afterwards.
    pub fn reset(&mut self, kind: ResetKind) -> Result<()> {
        let command = commands::cfg_rst(kind);
        warn!(kind = ?kind, "resetting receiver");
        self.send_command(&command)?;
        self.state = SessionState::Disconnected;
        Ok(())
    }

    fn send_command(&mut self, command: &Command) -> Result<()> {
        self.link.write_all(&command.frame).map_err(|e| {
            self.state = SessionState::Disconnected;
            GnssError::device_lost_with_source(format!("writing {}", command.name), e)
        })
    }

    fn wait_for_ack(&mut self, command: &Command) -> Result<()> {
        let deadline = Instant::now() + self.ack_timeout;
        let mut buf = [0u8; READ_BUF_LEN];
        let mut saw_traffic = false;

        while Instant::now() < deadline {
            let n = self.link.read(&mut buf).map_err(|e| {
                self.state = SessionState::Disconnected;
                GnssError::device_lost_with_source("reading during configuration", e)
            })?;
            if n == 0 {
                continue;
            }

            for frame in self.decoder.consume(&buf[..n]) {
                let RawFrame::Ubx(ubx) = frame else {
                    saw_traffic = true;
                    continue;
                };
                saw_traffic = true;
                match ubx.record() {
                    UbxRecord::AckAck { class, id }
                        if class == command.class && id == command.id =>
                    {
                        return Ok(());
                    }
                    UbxRecord::AckNak { class, id }
                        if class == command.class && id == command.id =>
                    {
                        self.state = SessionState::Degraded;
                        return Err(GnssError::ConfigurationRejected { command: command.name });
                    }
                    _ => {}
                }
            }
        }

        if saw_traffic {
            // The link is alive but the command went unacknowledged.
            self.state = SessionState::Degraded;
            Err(GnssError::ConfigurationRejected { command: command.name })
        } else {
            Err(GnssError::ConfigurationTimeout {
                command: command.name,
                timeout: self.ack_timeout,
            })
        }
    }

    /// Write correction bytes to the receiver. A failure is a lost device,
    /// identical to a read failure.
    pub fn write_corrections(&mut self, data: &[u8]) -> Result<()> {
        self.link.write_all(data).map_err(|e| {
            self.state = SessionState::Disconnected;
            GnssError::device_lost_with_source("writing corrections", e)
        })
    }

    /// Blocking read/write loop.
    ///
    /// Decoded frames go out through `frames_tx`; correction bytes arriving
    /// on `corrections_rx` are written opportunistically between reads. The
    /// loop ends on cancellation, on a closed frames channel (orchestrator
    /// shut down), or with `DeviceLost` on any link failure.
    pub fn run(
        mut self,
        frames_tx: mpsc::Sender<RawFrame>,
        mut corrections_rx: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut buf = [0u8; READ_BUF_LEN];
        info!("device read loop started");

        while !cancel.is_cancelled() {
            loop {
                match corrections_rx.try_recv() {
                    Ok(bytes) => {
                        self.write_corrections(&bytes)?;
                        debug!(len = bytes.len(), "forwarded correction bytes to receiver");
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => break,
                }
            }

            let n = self.link.read(&mut buf).map_err(|e| {
                self.state = SessionState::Disconnected;
                GnssError::device_lost_with_source("reading from device", e)
            })?;
            if n == 0 {
                continue; // read timeout: the loop's idle tick
            }

            for frame in self.decoder.consume(&buf[..n]) {
                if frame.is_malformed() {
                    continue; // counted by the decoder, recovered locally
                }
                if frames_tx.blocking_send(frame).is_err() {
                    debug!("frame receiver dropped, ending device loop");
                    return Ok(());
                }
            }
        }

        info!("device read loop cancelled");
        Ok(())
    }

    /// Malformed spans skipped by this session's decoder.
    pub fn malformed_count(&self) -> u64 {
        self.decoder.malformed_count()
    }

    #[cfg(test)]
    fn set_ack_timeout(&mut self, timeout: Duration) {
        self.ack_timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ubx;
    use crate::types::frame::{CLASS_ACK, ID_ACK_ACK, ID_ACK_NAK};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Scripted in-memory link: pops canned read chunks, records writes,
    /// and synthesizes acknowledgements for configuration frames.
    #[derive(Default)]
    struct ScriptedLink {
        reads: VecDeque<Vec<u8>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        /// When set, every written CFG frame queues this ack id in response.
        auto_ack: Option<u8>,
        fail_reads: bool,
    }

    impl ScriptedLink {
        fn acking() -> Self {
            Self { auto_ack: Some(ID_ACK_ACK), ..Self::default() }
        }

        fn nacking() -> Self {
            Self { auto_ack: Some(ID_ACK_NAK), ..Self::default() }
        }
    }

    impl SerialLink for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            match self.reads.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().push(data.to_vec());
            if let Some(ack_id) = self.auto_ack {
                // data is a framed command: class at 2, id at 3
                if data.len() > 3 && data[2] == 0x06 {
                    self.reads.push_back(ubx::encode(CLASS_ACK, ack_id, &[data[2], data[3]]));
                }
            }
            Ok(())
        }
    }

    fn fast_session(link: ScriptedLink) -> DeviceSession {
        let mut session = DeviceSession::with_link(Box::new(link));
        session.set_ack_timeout(Duration::from_millis(100));
        session
    }

    #[test]
    fn configure_acks_every_command() {
        let link = ScriptedLink::acking();
        let written = Arc::clone(&link.written);
        let mut session = fast_session(link);

        session.configure(&DeviceSettings::default()).expect("all commands acknowledged");
        assert_eq!(session.state(), SessionState::Streaming);

        // Rate, GNSS, NAV-PVT enable, NAV5, save.
        assert_eq!(written.lock().unwrap().len(), 5);
    }

    #[test]
    fn nak_maps_to_configuration_rejected() {
        let mut session = fast_session(ScriptedLink::nacking());
        let err = session.configure(&DeviceSettings::default()).unwrap_err();
        assert!(matches!(err, GnssError::ConfigurationRejected { command: "CFG-RATE" }));
    }

    #[test]
    fn silence_maps_to_configuration_timeout() {
        let mut session = fast_session(ScriptedLink::default());
        let err = session.configure(&DeviceSettings::default()).unwrap_err();
        assert!(matches!(err, GnssError::ConfigurationTimeout { command: "CFG-RATE", .. }));
    }

    #[test]
    fn traffic_without_ack_maps_to_rejected() {
        // The receiver keeps producing navigation output but never
        // acknowledges: the link is alive, the command was ignored.
        let mut link = ScriptedLink::default();
        for _ in 0..50 {
            link.reads.push_back(ubx::encode(0x01, 0x07, &[0u8; 92]));
        }
        let mut session = fast_session(link);
        let err = session.configure(&DeviceSettings::default()).unwrap_err();
        assert!(matches!(err, GnssError::ConfigurationRejected { command: "CFG-RATE" }));
    }

    #[test]
    fn dead_link_during_configure_is_device_lost() {
        let link = ScriptedLink { fail_reads: true, ..ScriptedLink::default() };
        let mut session = fast_session(link);
        let err = session.configure(&DeviceSettings::default()).unwrap_err();
        assert!(matches!(err, GnssError::DeviceLost { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn run_forwards_frames_and_corrections() {
        let mut link = ScriptedLink::default();
        link.reads.push_back(ubx::encode(0x01, 0x07, &[0u8; 92]));
        let written = Arc::clone(&link.written);
        let session = DeviceSession::with_link(Box::new(link));

        let (frames_tx, mut frames_rx) = mpsc::channel(16);
        let (corrections_tx, corrections_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        corrections_tx.send(vec![0xD3, 0x00, 0x01]).await.unwrap();

        let loop_cancel = cancel.clone();
        let handle =
            tokio::task::spawn_blocking(move || session.run(frames_tx, corrections_rx, loop_cancel));

        let frame =
            tokio::time::timeout(Duration::from_secs(2), frames_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(frame, RawFrame::Ubx(_)));

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let written = written.lock().unwrap();
        assert!(written.iter().any(|w| w == &[0xD3, 0x00, 0x01]));
    }

    #[tokio::test]
    async fn run_reports_device_lost_on_read_error() {
        let link = ScriptedLink { fail_reads: true, ..ScriptedLink::default() };
        let session = DeviceSession::with_link(Box::new(link));

        let (frames_tx, _frames_rx) = mpsc::channel(16);
        let (_corrections_tx, corrections_rx) = mpsc::channel(16);

        let result = tokio::task::spawn_blocking(move || {
            session.run(frames_tx, corrections_rx, CancellationToken::new())
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(GnssError::DeviceLost { .. })));
    }
}
