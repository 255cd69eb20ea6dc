//! Wacom raw-HID bootloader engines.
//!
//! [`WacomDevice`] implements the shared command exchange (set feature,
//! wait, get feature, validate, optionally poll while busy). [`AesDevice`]
//! and [`EmrDevice`] layer the family-specific erase and write sequences on
//! top of it.

pub mod aes;
pub mod device;
pub mod emr;

#[cfg(test)]
pub(crate) mod mock;

use {
    crate::error::{Error, Result},
    bitflags::bitflags,
    std::time::Duration,
};

pub use {aes::AesDevice, device::WacomDevice, emr::EmrDevice};

/// Default number of polls while the bootloader reports busy.
pub const CMD_RETRIES: u32 = 1000;

bitflags! {
    /// Options of a single bootloader command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CmdFlags: u8 {
        /// Keep re-reading the reply while the device is busy.
        const POLL_ON_WAITING = 1 << 0;
        /// Do not validate the reply at all.
        const NO_ERROR_CHECK = 1 << 1;
    }
}

/// Progress of a firmware write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WacomState {
    /// Nothing started.
    #[default]
    Idle,
    /// Erasing flash.
    Erasing,
    /// Writing the block with this index.
    Writing(usize),
    /// All blocks written.
    Done,
    /// A command failed; the device is partially written.
    Failed,
}

/// Raw-HID bootloader parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WacomConfig {
    /// Bytes per write-flash command.
    pub block_size: usize,
    /// Added to every block address on the wire.
    pub base_address: u32,
    /// Total wait budget for ordinary commands.
    pub command_wait: Duration,
    /// Total wait budget for erase-all.
    pub erase_wait: Duration,
    /// Fixed delay after erase-all succeeds.
    pub erase_settle: Duration,
    /// Delay after asking the device to enter the bootloader.
    pub detach_delay: Duration,
    /// Number of polls the wait budget is divided into.
    pub poll_retries: u32,
}

impl Default for WacomConfig {
    fn default() -> Self {
        Self {
            block_size: 128,
            base_address: 0,
            command_wait: Duration::from_secs(1),
            erase_wait: Duration::from_secs(2000),
            erase_settle: Duration::from_secs(2),
            detach_delay: Duration::from_millis(300),
            poll_retries: CMD_RETRIES,
        }
    }
}

impl WacomConfig {
    /// Defaults for EMR parts, whose bootloader answers ordinary commands
    /// much faster.
    pub fn emr() -> Self {
        Self {
            command_wait: Duration::from_millis(50),
            ..Self::default()
        }
    }

    /// Set the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the base address.
    #[must_use]
    pub fn with_base_address(mut self, base_address: u32) -> Self {
        self.base_address = base_address;
        self
    }

    /// Set the wait budgets.
    #[must_use]
    pub fn with_waits(mut self, command_wait: Duration, erase_wait: Duration) -> Self {
        self.command_wait = command_wait;
        self.erase_wait = erase_wait;
        self
    }

    /// Set the post-erase settle delay.
    #[must_use]
    pub fn with_erase_settle(mut self, settle: Duration) -> Self {
        self.erase_settle = settle;
        self
    }

    /// Set the detach delay.
    #[must_use]
    pub fn with_detach_delay(mut self, delay: Duration) -> Self {
        self.detach_delay = delay;
        self
    }

    /// Check that the block size can be encoded on the wire.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size % 8 != 0 {
            return Err(Error::InvalidInput(format!(
                "block size {} is not a multiple of 8",
                self.block_size
            )));
        }
        if self.block_size / 8 > usize::from(u8::MAX) {
            return Err(Error::InvalidInput(format!(
                "block size {} too large",
                self.block_size
            )));
        }
        if self.poll_retries == 0 {
            return Err(Error::InvalidInput("poll retries must be non-zero".into()));
        }
        Ok(())
    }

    /// Delay between polls for a command with total budget `wait`.
    pub fn poll_interval(&self, wait: Duration) -> Duration {
        wait / self.poll_retries.max(1)
    }
}
