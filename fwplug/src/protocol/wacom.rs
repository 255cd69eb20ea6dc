//! Wacom raw-HID bootloader framing.
//!
//! Every bootloader command is sent as a SET feature report and answered
//! through a GET feature report:
//!
//! ```text
//! Request:
//! +----------+-----+------+---------------------------+
//! | ReportID | CMD | Echo |          Payload          |
//! +----------+-----+------+---------------------------+
//! |   0x07   |  1  |  1   |  variable (cmd specific)  |
//! +----------+-----+------+---------------------------+
//!
//! Reply (at least 6 bytes):
//! +----------+-----+------+--------+------------------+
//! | ReportID | CMD | Echo | Return |     Payload      |
//! +----------+-----+------+--------+------------------+
//! ```
//!
//! The write-flash payload is `Address (LE32) | Size/8 | Data`.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fmt;

/// Runtime status report.
pub const STATUS_REPORT_ID: u8 = 0x04;
/// Size of the runtime status report.
pub const STATUS_REPORT_SIZE: usize = 16;

/// Firmware-mode report (query mode / detach).
pub const FW_REPORT_ID: u8 = 0x02;
/// Firmware-mode query sub-command.
pub const FW_CMD_QUERY_MODE: u8 = 0x00;
/// Detach-to-bootloader sub-command.
pub const FW_CMD_DETACH: u8 = 0x02;
/// Mode byte reported while running the bootloader.
pub const FW_MODE_BOOTLOADER: u8 = 0x02;

/// Maintenance report used for the hardware id probe.
pub const MAINTAIN_REPORT_ID: u8 = 0x09;
/// Size of the maintenance report.
pub const MAINTAIN_REPORT_SIZE: usize = 64;

/// Bootloader SET report.
pub const BL_REPORT_ID_SET: u8 = 0x07;
/// Size of a bootloader reply.
pub const BL_RESPONSE_SIZE: usize = 6;

/// Echo byte used by commands that do not carry an index.
pub const ECHO_DEFAULT: u8 = 0xEE;

/// Raw return byte meaning the command is still executing.
pub const RC_IN_PROGRESS: u8 = 0xFF;

/// Magic prefix of a valid hardware id reply.
pub const HWID_MAGIC: [u8; 8] = [0x34, 0x12, 0x78, 0x56, 0x65, 0x87, 0x21, 0x43];

/// Sentinel in byte 1 of the maintenance reply: feature not implemented.
pub const HWID_UNSUPPORTED: u8 = 0xFF;

const REQ_REPORT: usize = 0;
const REQ_CMD: usize = 1;
const REQ_ECHO: usize = 2;
const RTRN_RESP: usize = 3;

/// Bootloader command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlCommand {
    /// Erase one code-memory block.
    EraseFlash = 0x00,
    /// Write one block.
    WriteFlash = 0x01,
    /// Leave the bootloader.
    Attach = 0x03,
    /// Erase data memory.
    EraseDatamem = 0x0E,
    /// Erase all code memory.
    AllErase = 0x90,
}

/// Status reported by the bootloader in byte 3 of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// Command succeeded.
    Ok,
    /// Device is busy.
    Busy,
    /// Firmware was built for another MCU.
    McuTypeMismatch,
    /// Firmware was built for another product id.
    PidMismatch,
    /// First checksum failed.
    Checksum1Mismatch,
    /// Second checksum failed.
    Checksum2Mismatch,
    /// Command timed out on the device.
    Timeout,
    /// Code outside the documented table.
    Unknown(u8),
}

impl ReturnCode {
    /// Map a raw status byte.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => Self::Ok,
            0x80 => Self::Busy,
            0x0C => Self::McuTypeMismatch,
            0x0D => Self::PidMismatch,
            0x81 => Self::Checksum1Mismatch,
            0x82 => Self::Checksum2Mismatch,
            0x87 => Self::Timeout,
            other => Self::Unknown(other),
        }
    }

    /// The raw status byte.
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::Busy => 0x80,
            Self::McuTypeMismatch => 0x0C,
            Self::PidMismatch => 0x0D,
            Self::Checksum1Mismatch => 0x81,
            Self::Checksum2Mismatch => 0x82,
            Self::Timeout => 0x87,
            Self::Unknown(code) => code,
        }
    }

    /// Turn a non-OK code into a [`Error::Device`] for `op`.
    pub fn check(self, op: impl Into<String>) -> Result<()> {
        match self {
            Self::Ok => Ok(()),
            code => Err(Error::Device {
                op: op.into(),
                code,
            }),
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "success"),
            Self::Busy => write!(f, "device is busy"),
            Self::McuTypeMismatch => write!(f, "MCU type does not match"),
            Self::PidMismatch => write!(f, "PID does not match"),
            Self::Checksum1Mismatch => write!(f, "checksum1 does not match"),
            Self::Checksum2Mismatch => write!(f, "checksum2 does not match"),
            Self::Timeout => write!(f, "command timed out"),
            Self::Unknown(code) => write!(f, "unknown error {code:#04x}"),
        }
    }
}

/// Bootloader command frame builder.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    cmd: BlCommand,
    echo: u8,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create a frame with an empty payload.
    pub fn new(cmd: BlCommand, echo: u8) -> Self {
        Self {
            cmd,
            echo,
            data: Vec::new(),
        }
    }

    /// Build the erase-all frame (echo 0x01, block number 0).
    pub fn erase_all() -> Self {
        let mut frame = Self::new(BlCommand::AllErase, 0x01);
        frame.data.push(0x00);
        frame
    }

    /// Build a write-flash frame.
    ///
    /// `address` is the absolute device address; the size byte counts
    /// 8-byte words.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_flash(echo: u8, address: u32, data: &[u8]) -> Self {
        let mut frame = Self::new(BlCommand::WriteFlash, echo);
        frame.data.write_u32::<LittleEndian>(address).unwrap();
        // Block sizes are validated to at most 255 words
        frame.data.push((data.len() / 8) as u8);
        frame.data.extend_from_slice(data);
        frame
    }

    /// Build the attach (leave bootloader) frame.
    pub fn attach() -> Self {
        Self::new(BlCommand::Attach, ECHO_DEFAULT)
    }

    /// Build the erase-data-memory frame (sector erase devices).
    pub fn erase_datamem(echo: u8) -> Self {
        let mut frame = Self::new(BlCommand::EraseDatamem, echo);
        frame.data.push(0x00);
        frame
    }

    /// Build an erase frame for a single code-memory block.
    pub fn erase_code_block(echo: u8, block: u8) -> Self {
        let mut frame = Self::new(BlCommand::EraseFlash, echo);
        frame.data.push(block);
        frame
    }

    /// Append a two's-complement checksum of everything built so far,
    /// starting from `seed`.
    #[must_use]
    pub fn with_frame_checksum(mut self, seed: u8) -> Self {
        let sum = checksum(seed, &self.header_and_data());
        self.data.push(sum);
        self
    }

    /// Append a two's-complement checksum over the payload after byte
    /// `skip`, starting from `seed`.
    #[must_use]
    pub fn with_data_checksum(mut self, seed: u8, skip: usize) -> Self {
        let sum = checksum(seed, self.data.get(skip..).unwrap_or_default());
        self.data.push(sum);
        self
    }

    fn header_and_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.data.len());
        buf.push(BL_REPORT_ID_SET);
        buf.push(self.cmd as u8);
        buf.push(self.echo);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Build the complete frame.
    pub fn build(&self) -> Vec<u8> {
        self.header_and_data()
    }

    /// Get the command.
    pub fn command(&self) -> BlCommand {
        self.cmd
    }

    /// Get the echo byte.
    pub fn echo(&self) -> u8 {
        self.echo
    }
}

/// Two's-complement checksum used by sector-erase bootloaders.
pub fn checksum(seed: u8, data: &[u8]) -> u8 {
    let sum = data.iter().fold(seed, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

/// Validate that `reply` answers `request`.
///
/// Report id, command and echo byte are compared independently; the first
/// mismatch is reported.
pub fn check_reply(request: &[u8], reply: &[u8]) -> Result<()> {
    if request.len() <= REQ_ECHO || reply.len() < BL_RESPONSE_SIZE {
        return Err(Error::Protocol(format!(
            "reply too short: {} bytes",
            reply.len()
        )));
    }
    let fields = [
        ("report ID", REQ_REPORT),
        ("cmd", REQ_CMD),
        ("echo", REQ_ECHO),
    ];
    for (field, idx) in fields {
        if request[idx] != reply[idx] {
            return Err(Error::ProtocolDesync {
                field,
                expected: request[idx],
                actual: reply[idx],
            });
        }
    }
    Ok(())
}

/// Raw status byte of a reply.
pub fn reply_status(reply: &[u8]) -> Result<u8> {
    reply
        .get(RTRN_RESP)
        .copied()
        .ok_or_else(|| Error::Protocol("reply has no return code".into()))
}

/// Decode the hardware id from a maintenance reply.
///
/// Returns `None` when the firmware does not implement the probe or the
/// reply does not carry the magic prefix.
pub fn parse_hwid(reply: &[u8]) -> Option<u32> {
    if reply.len() < 12 || reply[1] == HWID_UNSUPPORTED {
        return None;
    }
    if reply[..8] != HWID_MAGIC {
        return None;
    }
    Some(
        u32::from(reply[9]) << 24
            | u32::from(reply[8]) << 16
            | u32::from(reply[11]) << 8
            | u32::from(reply[10]),
    )
}

/// Format the runtime version from a status report.
pub fn parse_status_version(report: &[u8]) -> Result<String> {
    if report.len() < 14 {
        return Err(Error::Protocol(format!(
            "status report too short: {} bytes",
            report.len()
        )));
    }
    let major = LittleEndian::read_u16(&report[11..13]);
    Ok(format!("{major:04x}.{:02x}", report[13]))
}
