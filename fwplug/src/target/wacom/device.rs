//! Shared raw-HID bootloader engine.

use {
    crate::{
        chunk::{Chunk, Chunks},
        error::{Error, Result},
        locker::Lockable,
        port::HidPort,
        protocol::wacom::{
            self, BL_RESPONSE_SIZE, CommandFrame, FW_CMD_DETACH, FW_CMD_QUERY_MODE,
            FW_MODE_BOOTLOADER, FW_REPORT_ID, MAINTAIN_REPORT_ID, MAINTAIN_REPORT_SIZE,
            RC_IN_PROGRESS, ReturnCode, STATUS_REPORT_ID, STATUS_REPORT_SIZE, check_reply,
        },
        target::{
            device::Progress,
            wacom::{CmdFlags, WacomConfig, WacomState},
        },
    },
    log::{debug, info, trace, warn},
    std::{borrow::Cow, thread, time::Duration},
};

/// Version reported while the bootloader is running.
pub const BOOTLOADER_VERSION: &str = "0.0";

/// Raw-HID bootloader session over a [`HidPort`].
pub struct WacomDevice<P: HidPort> {
    port: P,
    config: WacomConfig,
    state: WacomState,
    bootloader: bool,
}

impl<P: HidPort> WacomDevice<P> {
    /// Create an engine for `port`.
    pub fn new(port: P, config: WacomConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            port,
            config,
            state: WacomState::Idle,
            bootloader: false,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &WacomConfig {
        &self.config
    }

    /// Current write state.
    pub fn state(&self) -> WacomState {
        self.state
    }

    /// Whether the device last reported bootloader mode.
    pub fn is_bootloader(&self) -> bool {
        self.bootloader
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the engine and return the port.
    pub fn into_port(self) -> P {
        self.port
    }

    pub(crate) fn set_state(&mut self, state: WacomState) {
        trace!("state {:?} -> {state:?}", self.state);
        self.state = state;
    }

    /// Run a complete write sequence, recording `Done` or `Failed`.
    pub(crate) fn run<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.set_state(WacomState::Idle);
        let result = f(self);
        match result {
            Ok(()) => self.set_state(WacomState::Done),
            Err(ref e) => {
                warn!("{} left partially written: {e}", self.port.name());
                self.set_state(WacomState::Failed);
            },
        }
        result
    }

    /// Open the port. Opening an open port is a no-op.
    pub fn open(&mut self) -> Result<()> {
        if self
            .port
            .is_open()
        {
            return Ok(());
        }
        self.port
            .open()
    }

    /// Close the port.
    pub fn close(&mut self) -> Result<()> {
        self.port
            .close()
    }

    /// Send a bootloader command and return its validated reply.
    ///
    /// `wait` is the total budget: one interval (`wait / poll_retries`)
    /// passes before the first read and between polls.
    pub fn cmd(
        &mut self,
        op: &str,
        request: &[u8],
        wait: Duration,
        flags: CmdFlags,
    ) -> Result<[u8; BL_RESPONSE_SIZE]> {
        let interval = self
            .config
            .poll_interval(wait);
        let mut reply = [0u8; BL_RESPONSE_SIZE];

        self.port
            .set_feature(request)?;
        thread::sleep(interval);
        self.read_reply(request, &mut reply)?;

        if flags.contains(CmdFlags::NO_ERROR_CHECK) {
            return Ok(reply);
        }
        check_reply(request, &reply)?;

        if flags.contains(CmdFlags::POLL_ON_WAITING) {
            for _ in 0..self
                .config
                .poll_retries
            {
                let rc = wacom::reply_status(&reply)?;
                if rc != ReturnCode::Busy.code() && rc != RC_IN_PROGRESS {
                    break;
                }
                thread::sleep(interval);
                self.read_reply(request, &mut reply)?;
                check_reply(request, &reply)?;
            }
        }

        ReturnCode::from_u8(wacom::reply_status(&reply)?).check(op)?;
        Ok(reply)
    }

    fn read_reply(&mut self, request: &[u8], reply: &mut [u8]) -> Result<()> {
        // Ask for the report the request was sent on
        reply.fill(0);
        reply[0] = request
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidInput("empty request".into()))?;
        self.port
            .get_feature(reply)
    }

    /// Erase all code memory and wait for the flash to settle.
    pub fn erase_all(&mut self) -> Result<()> {
        info!("Erasing {}...", self.port.name());
        let frame = CommandFrame::erase_all().build();
        let wait = self
            .config
            .erase_wait;
        self.cmd("erase", &frame, wait, CmdFlags::POLL_ON_WAITING)?;
        thread::sleep(
            self.config
                .erase_settle,
        );
        debug!("erase complete");
        Ok(())
    }

    /// Write one block at `address` (relative to the base address).
    pub fn write_block(&mut self, index: usize, address: u32, data: &[u8]) -> Result<()> {
        let frame = self.block_frame(index, address, data)?;
        self.send_block(index, &frame.build())
    }

    /// Build the write-flash frame for a block after checking its size.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn block_frame(&self, index: usize, address: u32, data: &[u8]) -> Result<CommandFrame> {
        if data.len() != self.config.block_size {
            return Err(Error::SizeMismatch {
                expected: self
                    .config
                    .block_size,
                actual: data.len(),
            });
        }
        // The echo byte only carries the low 8 bits of the index
        let echo = index as u8;
        let address = address.wrapping_add(
            self.config
                .base_address,
        );
        Ok(CommandFrame::write_flash(echo, address, data))
    }

    pub(crate) fn send_block(&mut self, index: usize, frame: &[u8]) -> Result<()> {
        trace!("writing block {index}");
        let wait = self
            .config
            .command_wait;
        self.cmd(&format!("write block {index}"), frame, wait, CmdFlags::empty())?;
        Ok(())
    }

    /// Erase, then write `blocks` in order, reporting progress after each.
    pub fn write_firmware(&mut self, blocks: &[Chunk<'_>], progress: Progress<'_>) -> Result<()> {
        warn_echo_wrap(blocks.len());
        self.run(|dev| {
            dev.set_state(WacomState::Erasing);
            dev.erase_all()?;
            dev.write_blocks(blocks, progress)
        })
    }

    pub(crate) fn write_blocks(&mut self, blocks: &[Chunk<'_>], progress: Progress<'_>) -> Result<()> {
        let total = blocks.len();
        for (i, block) in blocks
            .iter()
            .enumerate()
        {
            self.set_state(WacomState::Writing(i));
            self.write_block(block.index, block.address, block.data)?;
            progress("write", i + 1, total);
        }
        Ok(())
    }

    /// Pad an image to whole blocks with erased (`0xFF`) bytes.
    pub fn pad_image<'a>(&self, image: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if image.is_empty() {
            return Err(Error::InvalidInput("empty firmware image".into()));
        }
        let block_size = self
            .config
            .block_size;
        if image.len() % block_size == 0 {
            return Ok(Cow::Borrowed(image));
        }
        let mut padded = image.to_vec();
        padded.resize(image.len().next_multiple_of(block_size), 0xFF);
        debug!("padded image from {} to {} bytes", image.len(), padded.len());
        Ok(Cow::Owned(padded))
    }

    /// Chunk a block-aligned image.
    pub fn chunk<'a>(&self, image: &'a [u8]) -> Result<Vec<Chunk<'a>>> {
        Ok(Chunks::new(image, self.config.block_size, 0)?.collect())
    }

    /// Ask the runtime firmware whether the bootloader is active.
    pub fn query_mode(&mut self) -> Result<bool> {
        let mut buf = [FW_REPORT_ID, FW_CMD_QUERY_MODE];
        self.port
            .set_feature(&buf)?;
        buf[1] = 0;
        self.port
            .get_feature(&mut buf)?;
        self.bootloader = buf[1] == FW_MODE_BOOTLOADER;
        debug!("{} mode: {:#04x}", self.port.name(), buf[1]);
        Ok(self.bootloader)
    }

    /// Read the firmware version.
    pub fn read_version(&mut self) -> Result<String> {
        if self.bootloader {
            return Ok(BOOTLOADER_VERSION.to_string());
        }
        let mut report = [0u8; STATUS_REPORT_SIZE];
        report[0] = STATUS_REPORT_ID;
        self.port
            .get_feature(&mut report)?;
        wacom::parse_status_version(&report)
    }

    /// Probe the optional hardware id.
    ///
    /// Returns `Ok(None)` when the firmware does not implement the probe.
    pub fn obtain_hwid(&mut self) -> Result<Option<u32>> {
        let mut request = [0u8; MAINTAIN_REPORT_SIZE];
        request[..4].copy_from_slice(&[MAINTAIN_REPORT_ID, 0x01, 0x01, 0x0F]);
        self.port
            .set_feature(&request)?;

        let mut reply = [0u8; MAINTAIN_REPORT_SIZE];
        reply[0] = MAINTAIN_REPORT_ID;
        self.port
            .get_feature(&mut reply)?;
        let hwid = wacom::parse_hwid(&reply);
        if hwid.is_none() {
            debug!("firmware does not report a hardware id");
        }
        Ok(hwid)
    }

    /// Ask the runtime firmware to reboot into the bootloader.
    pub fn detach(&mut self) -> Result<()> {
        if self.bootloader {
            debug!("already in bootloader mode");
            return Ok(());
        }
        info!("Switching {} to bootloader mode", self.port.name());
        self.port
            .set_feature(&[FW_REPORT_ID, FW_CMD_DETACH])?;
        thread::sleep(
            self.config
                .detach_delay,
        );
        self.bootloader = true;
        Ok(())
    }

    /// Leave the bootloader.
    pub fn attach(&mut self) -> Result<()> {
        if !self.bootloader {
            debug!("already in runtime mode");
            return Ok(());
        }
        let frame = CommandFrame::attach().build();
        let wait = self
            .config
            .command_wait;
        self.cmd("attach", &frame, wait, CmdFlags::NO_ERROR_CHECK)?;
        self.bootloader = false;
        Ok(())
    }
}

impl<P: HidPort> Lockable for WacomDevice<P> {
    fn open(&mut self) -> Result<()> {
        WacomDevice::open(self)
    }

    fn close(&mut self) -> Result<()> {
        WacomDevice::close(self)
    }
}

pub(crate) fn warn_echo_wrap(blocks: usize) {
    if blocks > 256 {
        warn!("{blocks} blocks: echo byte wraps after block 255");
    }
}
