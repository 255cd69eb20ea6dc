//! Wacom EMR digitizers.
//!
//! EMR bootloaders checksum every frame. Older parts cannot erase all of
//! code memory at once and need data memory plus each code block erased
//! separately ("sector erase"); blank blocks are never written.

use {
    crate::{
        digest::is_erased,
        error::Result,
        locker::DeviceLocker,
        port::HidPort,
        protocol::wacom::CommandFrame,
        target::{
            device::{DeviceDescription, DeviceFamily, FirmwareDevice, Progress},
            wacom::{
                CmdFlags, WacomConfig, WacomDevice, WacomState, device::warn_echo_wrap,
            },
        },
    },
    log::{debug, info},
};

/// Display name of EMR parts.
pub const EMR_DEVICE_NAME: &str = "Embedded Wacom EMR Device";

/// Checksum seed of erase frames.
pub const ERASE_CHECKSUM_SEED: u8 = 0x05 + 0x07;
/// Checksum seed of write-flash payloads.
pub const WRITE_CHECKSUM_SEED: u8 = 0x05 + 0x4C;

/// Highest code block erased in sector mode.
pub const SECTOR_ERASE_FIRST: u8 = 127;
/// Lowest code block erased in sector mode; blocks below hold the bootloader.
pub const SECTOR_ERASE_LAST: u8 = 8;

/// Wacom EMR update engine.
pub struct EmrDevice<P: HidPort> {
    dev: WacomDevice<P>,
    sector_erase: bool,
    version: Option<String>,
}

impl<P: HidPort> EmrDevice<P> {
    /// Create an engine for `port`.
    pub fn new(port: P, config: WacomConfig) -> Result<Self> {
        Ok(Self {
            dev: WacomDevice::new(port, config)?,
            sector_erase: false,
            version: None,
        })
    }

    /// Erase block by block instead of with a single erase-all.
    #[must_use]
    pub fn with_sector_erase(mut self, sector_erase: bool) -> Self {
        self.sector_erase = sector_erase;
        self
    }

    /// Shared bootloader engine.
    pub fn device(&self) -> &WacomDevice<P> {
        &self.dev
    }
}

/// Per-command echo counter shared by the erase and write phases.
struct Echo(u8);

impl Echo {
    fn next(&mut self) -> u8 {
        let echo = self.0;
        self.0 = self
            .0
            .wrapping_add(1);
        echo
    }
}

fn sector_erase<P: HidPort>(dev: &mut WacomDevice<P>, echo: &mut Echo) -> Result<()> {
    let wait = dev
        .config()
        .command_wait;
    info!("Erasing data memory...");
    let frame = CommandFrame::erase_datamem(echo.next())
        .with_frame_checksum(ERASE_CHECKSUM_SEED)
        .build();
    dev.cmd("erase data memory", &frame, wait, CmdFlags::POLL_ON_WAITING)?;

    info!("Erasing code blocks {SECTOR_ERASE_FIRST}..={SECTOR_ERASE_LAST}...");
    for block in (SECTOR_ERASE_LAST..=SECTOR_ERASE_FIRST).rev() {
        let frame = CommandFrame::erase_code_block(echo.next(), block)
            .with_frame_checksum(ERASE_CHECKSUM_SEED)
            .build();
        dev.cmd(
            &format!("erase code block {block}"),
            &frame,
            wait,
            CmdFlags::POLL_ON_WAITING,
        )?;
    }
    Ok(())
}

impl<P: HidPort> FirmwareDevice for EmrDevice<P> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::WacomEmr
    }

    fn setup(&mut self) -> Result<()> {
        let mut dev = DeviceLocker::new(&mut self.dev)?;
        dev.query_mode()?;
        let version = dev.read_version()?;
        info!("{EMR_DEVICE_NAME} version {version}");
        self.version = Some(version);
        dev.close()
    }

    fn detach(&mut self) -> Result<()> {
        let mut dev = DeviceLocker::new(&mut self.dev)?;
        dev.detach()?;
        dev.close()
    }

    fn write_firmware(&mut self, firmware: &[u8], progress: Progress<'_>) -> Result<()> {
        let sector = self.sector_erase;
        let mut dev = DeviceLocker::new(&mut self.dev)?;
        let image = dev.pad_image(firmware)?;
        let blocks = dev.chunk(&image)?;
        warn_echo_wrap(blocks.len());

        dev.run(|dev| {
            let mut echo = Echo(1);
            dev.set_state(WacomState::Erasing);
            if sector {
                sector_erase(dev, &mut echo)?;
            } else {
                dev.erase_all()?;
            }

            let total = blocks.len();
            for (i, block) in blocks
                .iter()
                .enumerate()
            {
                if is_erased(block.data) {
                    debug!("skipping blank block {i}");
                    progress("write", i + 1, total);
                    continue;
                }
                dev.set_state(WacomState::Writing(i));
                let index = usize::from(echo.next());
                // Skip report, cmd, echo, address and size before summing
                let frame = dev
                    .block_frame(index, block.address, block.data)?
                    .with_data_checksum(WRITE_CHECKSUM_SEED, 5)
                    .build();
                dev.send_block(i, &frame)?;
                progress("write", i + 1, total);
            }
            Ok(())
        })?;
        dev.close()
    }

    fn attach(&mut self) -> Result<()> {
        let mut dev = DeviceLocker::new(&mut self.dev)?;
        dev.attach()?;
        dev.close()
    }

    fn describe(&self) -> DeviceDescription {
        DeviceDescription {
            name: EMR_DEVICE_NAME.to_string(),
            family: DeviceFamily::WacomEmr,
            version: self
                .version
                .clone(),
            guids: Vec::new(),
        }
    }
}
