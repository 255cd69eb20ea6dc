//! QMI Persistent Device Configuration (PDC) message types.
//!
//! Only the subset needed to push a configuration blob is modelled:
//! the `LoadConfig` request, its response result and the asynchronous
//! `LoadConfig` indication that confirms each chunk.

use {bitflags::bitflags, std::fmt};

/// Largest chunk a single `LoadConfig` request may carry.
pub const LOAD_CONFIG_CHUNK_SIZE: usize = 0x400;

/// Length of the configuration id (SHA-1 of the blob).
pub const CONFIG_ID_LEN: usize = 20;

/// QMI protocol error code carried in responses and indications.
///
/// Only the values the loader needs to reason about are named; everything
/// else is displayed numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QmiProtocolError(pub u16);

impl QmiProtocolError {
    /// No error.
    pub const NONE: Self = Self(0);
    /// Malformed message.
    pub const MALFORMED_MESSAGE: Self = Self(1);
    /// Out of memory on the modem.
    pub const NO_MEMORY: Self = Self(2);
    /// Internal modem error.
    pub const INTERNAL: Self = Self(3);
    /// Invalid client id.
    pub const INVALID_CLIENT_ID: Self = Self(5);
    /// Argument out of range.
    pub const INVALID_ARGUMENT: Self = Self(48);
    /// Invalid QoS id; the PDC service also reports this when the
    /// configuration is already loaded.
    pub const INVALID_QOS_ID: Self = Self(41);
    /// Request not supported by the service.
    pub const NOT_SUPPORTED: Self = Self(94);

    /// Whether this is a success code.
    pub fn is_success(self) -> bool {
        self == Self::NONE
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::NONE => "none",
            Self::MALFORMED_MESSAGE => "malformed-message",
            Self::NO_MEMORY => "no-memory",
            Self::INTERNAL => "internal",
            Self::INVALID_CLIENT_ID => "invalid-client-id",
            Self::INVALID_QOS_ID => "invalid-qos-id",
            Self::INVALID_ARGUMENT => "invalid-argument",
            Self::NOT_SUPPORTED => "not-supported",
            _ => return None,
        })
    }
}

impl fmt::Display for QmiProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "QMI error {} ({name})", self.0),
            None => write!(f, "QMI error {}", self.0),
        }
    }
}

impl From<u16> for QmiProtocolError {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

bitflags! {
    /// Flags passed when opening a QMI device channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Negotiate the protocol version.
        const VERSION_INFO = 1 << 0;
        /// Synchronise the control service.
        const SYNC = 1 << 1;
        /// Use the network interface in 802.3 mode.
        const NET_802_3 = 1 << 2;
        /// Use raw-ip network mode.
        const NET_RAW_IP = 1 << 3;
        /// Open through the multiplexing proxy.
        const PROXY = 1 << 7;
        /// Pick QMI or MBIM framing automatically.
        const AUTO = 1 << 9;
        /// Expect indications on the channel.
        const EXPECT_INDICATIONS = 1 << 10;
    }
}

impl OpenFlags {
    /// Flags used by the configuration loader.
    pub fn loader() -> Self {
        Self::AUTO | Self::EXPECT_INDICATIONS | Self::PROXY
    }
}

/// PDC configuration type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConfigType {
    /// Platform configuration.
    Platform,
    /// Software (carrier) configuration.
    Software,
}

/// Input of one `LoadConfig` request.
#[derive(Debug, Clone, Copy)]
pub struct LoadConfigInput<'a> {
    /// Request token, unique within a transfer.
    pub token: u32,
    /// Configuration type.
    pub config_type: ConfigType,
    /// Configuration id (SHA-1 of the complete blob).
    pub id: &'a [u8; CONFIG_ID_LEN],
    /// Size of the complete blob.
    pub total_size: u32,
    /// This chunk.
    pub chunk: &'a [u8],
}

/// Asynchronous `LoadConfig` indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfigIndication {
    /// Result code of the chunk.
    pub result_code: QmiProtocolError,
    /// Set when the modem discarded the partial upload.
    pub frame_reset: Option<bool>,
    /// Bytes the modem still expects.
    pub remaining_size: Option<u32>,
}

impl LoadConfigIndication {
    /// Indication confirming a chunk with `remaining` bytes left.
    pub fn remaining(remaining: u32) -> Self {
        Self {
            result_code: QmiProtocolError::NONE,
            frame_reset: None,
            remaining_size: Some(remaining),
        }
    }

    /// Indication carrying an error code.
    pub fn error(code: QmiProtocolError) -> Self {
        Self {
            result_code: code,
            frame_reset: None,
            remaining_size: None,
        }
    }
}
