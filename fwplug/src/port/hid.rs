//! Feature-report transport used by raw-HID bootloaders.

use crate::error::Result;

/// A HID device addressed through feature reports.
///
/// Byte 0 of every buffer is the report id, both on set and on get.
pub trait HidPort: Send {
    /// Open the device node. Opening an already open port is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Close the device node. Closing a closed port is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Whether the node is currently open.
    fn is_open(&self) -> bool;

    /// Send a SET_FEATURE report.
    fn set_feature(&mut self, data: &[u8]) -> Result<()>;

    /// Issue a GET_FEATURE for the report id in `buf[0]`, filling `buf`.
    fn get_feature(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Device node name, for logging.
    fn name(&self) -> &str;
}

impl<T: HidPort + ?Sized> HidPort for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn set_feature(&mut self, data: &[u8]) -> Result<()> {
        (**self).set_feature(data)
    }

    fn get_feature(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).get_feature(buf)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
