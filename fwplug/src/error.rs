//! Error types for fwplug.

use std::io;
use thiserror::Error;

use crate::protocol::qmi::QmiProtocolError;
use crate::protocol::wacom::ReturnCode;

/// Result type for fwplug operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fwplug operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (hidraw node, snapshot files, transport read/write).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A reply did not belong to the request that elicited it.
    #[error("{field} mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ProtocolDesync {
        /// Which framing field disagreed.
        field: &'static str,
        /// Value sent in the request.
        expected: u8,
        /// Value found in the reply.
        actual: u8,
    },

    /// Raw-HID bootloader reported a non-OK status.
    #[error("{op} failed: {code}")]
    Device {
        /// Operation that was running.
        op: String,
        /// Status reported by the device.
        code: ReturnCode,
    },

    /// Modem reported a non-zero QMI protocol error.
    #[error("{op} failed: {code}")]
    Qmi {
        /// Operation that was running.
        op: String,
        /// Protocol error reported by the modem.
        code: QmiProtocolError,
    },

    /// No confirmation arrived in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed input (filename, empty blob, bad configuration).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Data length does not match what the device requires.
    #[error("Size mismatch: expected {expected:#x} bytes, got {actual:#x}")]
    SizeMismatch {
        /// Required size.
        expected: usize,
        /// Supplied size.
        actual: usize,
    },

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unsupported device or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A blob in a batch failed; later blobs were not attempted.
    #[error("Failed to write '{name}': {source}")]
    Batch {
        /// Name of the blob that failed.
        name: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the HID return code if this is a device status error.
    pub fn return_code(&self) -> Option<ReturnCode> {
        match self {
            Self::Device { code, .. } => Some(*code),
            Self::Batch { source, .. } => source.return_code(),
            _ => None,
        }
    }

    /// Returns the QMI protocol error if the modem reported one.
    pub fn qmi_code(&self) -> Option<QmiProtocolError> {
        match self {
            Self::Qmi { code, .. } => Some(*code),
            Self::Batch { source, .. } => source.qmi_code(),
            _ => None,
        }
    }
}
