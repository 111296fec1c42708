//! Serial link abstraction.
//!
//! [`SerialLink`] is the seam between the session logic and the physical
//! port: production code talks to a `serialport` handle, tests substitute a
//! scripted in-memory double. Read timeouts are normalized to `Ok(0)` so the
//! session loop can use them as its pacing tick instead of treating them as
//! failures.

use std::io;
use std::path::Path;
use std::time::Duration;

use serialport::SerialPort;
use tracing::info;

use crate::error::{GnssError, Result};

/// Byte-level serial transport.
pub trait SerialLink: Send {
    /// Read available bytes. Returns `Ok(0)` when the read timed out with
    /// nothing buffered; any other error means the device is gone.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer or fail.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// `serialport`-backed link, 8N1.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
}

impl SerialPortLink {
    /// Open the device at `path` with the given baud rate and read timeout.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        if !Path::new(path).exists() {
            return Err(GnssError::DeviceNotFound { path: path.into() });
        }

        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(read_timeout)
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                    GnssError::DevicePermissionDenied { path: path.into() }
                }
                serialport::ErrorKind::NoDevice => {
                    GnssError::DeviceNotFound { path: path.into() }
                }
                _ => GnssError::io(format!("opening {path}"), io::Error::other(e)),
            })?;

        info!(path, baud_rate, "serial device opened");
        Ok(Self { port })
    }
}

impl SerialLink for SerialPortLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)
    }
}
