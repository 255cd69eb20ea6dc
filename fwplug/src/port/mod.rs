//! Transport abstractions.
//!
//! Engines never talk to the OS directly; they drive one of two traits:
//!
//! ```text
//! +-------------------+      +-------------------+
//! |  protocol::at     |      |  target::wacom    |
//! +---------+---------+      +---------+---------+
//!           |                          |
//!           v                          v
//! +---------+---------+      +---------+---------+
//! |    Port (byte     |      |  HidPort (feature |
//! |     stream)       |      |     reports)      |
//! +---------+---------+      +---------+---------+
//!           |                          |
//!           v                          v
//! +---------+---------+      +---------+---------+
//! |    NativePort     |      |    HidrawPort     |
//! |   (serialport)    |      |  (Linux hidraw)   |
//! +-------------------+      +-------------------+
//! ```
//!
//! The QMI channel is abstracted separately in
//! [`crate::target::modem::qmi`] because it is message based and
//! asynchronous.

pub mod hid;
#[cfg(all(feature = "native", target_os = "linux"))]
pub mod hidraw;
#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration for the AT channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port path (e.g., "/dev/ttyUSB2").
    pub port_name: String,
    /// Baud rate. Modem AT ports ignore it but the OS wants one.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: crate::protocol::at::AT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a configuration for `port_name` with default settings.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-stream port (serial AT channel).
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
pub use hid::HidPort;
#[cfg(all(feature = "native", target_os = "linux"))]
pub use hidraw::HidrawPort;

/// Scripted in-memory serial port for tests.
#[cfg(test)]
pub(crate) struct MockPort {
    name: String,
    timeout: Duration,
    read_data: std::collections::VecDeque<u8>,
    written: Vec<u8>,
    pub(crate) closed: bool,
}

#[cfg(test)]
impl MockPort {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timeout: Duration::from_millis(100),
            read_data: std::collections::VecDeque::new(),
            written: Vec::new(),
            closed: false,
        }
    }

    pub(crate) fn push_read(&mut self, data: &[u8]) {
        self.read_data.extend(data.iter().copied());
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }
}

#[cfg(test)]
impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.read_data.len());
        for (slot, byte) in buf.iter_mut().zip(self.read_data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[cfg(test)]
impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
