//! System SPI flash through a flashrom programmer.
//!
//! The programmer library does the real work; this module only enforces the
//! contract around it: full-size images, the BIOS region only, and a
//! snapshot of the original contents before the first write.

use {
    crate::{
        error::{Error, Result},
        target::device::{DeviceDescription, DeviceFamily, FirmwareDevice, Progress},
    },
    log::{debug, info},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Region written by [`FlashromDevice`].
pub const BIOS_REGION: &str = "bios";

/// Default directory for snapshots of the original flash contents.
pub const SNAPSHOT_DIR: &str = "/var/lib/fwupd/builder";

/// A named region of the flash descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRegion {
    /// Region name (`fd`, `bios`, `me`, ...).
    pub name: String,
    /// First byte.
    pub start: u32,
    /// Last byte, inclusive.
    pub end: u32,
    included: bool,
}

impl FlashRegion {
    /// Create an excluded region.
    pub fn new(name: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            included: false,
        }
    }

    /// Whether the region will be written.
    pub fn is_included(&self) -> bool {
        self.included
    }
}

/// Flash layout as read from the Intel flash descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashLayout {
    regions: Vec<FlashRegion>,
}

impl FlashLayout {
    /// Build a layout with every region excluded.
    pub fn new(regions: Vec<FlashRegion>) -> Self {
        Self { regions }
    }

    /// Mark `name` for writing.
    pub fn include_region(&mut self, name: &str) -> Result<()> {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::Unsupported(format!("invalid region name {name}")))?;
        region.included = true;
        Ok(())
    }

    /// Regions marked for writing.
    pub fn included(&self) -> impl Iterator<Item = &FlashRegion> {
        self.regions
            .iter()
            .filter(|r| r.included)
    }
}

/// Operations of a probed flash chip.
pub trait FlashProgrammer {
    /// Chip size in bytes.
    fn flash_size(&self) -> usize;

    /// Read the whole chip into `buf` (exactly [`Self::flash_size`] bytes).
    fn read_image(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Read the region layout from the Intel flash descriptor.
    fn read_ifd_layout(&mut self) -> Result<FlashLayout>;

    /// Write the included regions of `image`.
    fn write_image(&mut self, image: &[u8], layout: &FlashLayout, verify: bool) -> Result<()>;
}

/// Contract layer over a [`FlashProgrammer`].
pub struct SpiFlashWriter<F: FlashProgrammer> {
    programmer: F,
}

impl<F: FlashProgrammer> SpiFlashWriter<F> {
    /// Wrap a probed programmer.
    pub fn new(programmer: F) -> Result<Self> {
        if programmer.flash_size() == 0 {
            return Err(Error::Unsupported("flash probe failed".into()));
        }
        Ok(Self { programmer })
    }

    /// Chip size in bytes.
    pub fn flash_size(&self) -> usize {
        self.programmer
            .flash_size()
    }

    /// Read the entire chip.
    pub fn read_full_image(&mut self) -> Result<Vec<u8>> {
        let mut image = vec![0u8; self.flash_size()];
        self.programmer
            .read_image(&mut image)
            .map_err(|e| Error::Protocol(format!("failed to get original firmware: {e}")))?;
        Ok(image)
    }

    /// Save the current contents to `path` unless a snapshot already exists.
    ///
    /// Returns whether a new snapshot was written.
    pub fn snapshot(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            debug!("snapshot {} already exists", path.display());
            return Ok(false);
        }
        let image = self.read_full_image()?;
        fs::write(path, &image)?;
        info!("saved original firmware to {}", path.display());
        Ok(true)
    }

    /// Write `image` to `region`, verifying afterwards.
    pub fn write(&mut self, image: &[u8], region: &str) -> Result<()> {
        let expected = self.flash_size();
        if image.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: image.len(),
            });
        }
        let mut layout = self
            .programmer
            .read_ifd_layout()
            .map_err(|e| {
                Error::Protocol(format!(
                    "failed to read layout from Intel ICH descriptor: {e}"
                ))
            })?;
        layout.include_region(region)?;
        self.programmer
            .write_image(image, &layout, true)
    }

    /// The wrapped programmer.
    pub fn programmer(&self) -> &F {
        &self.programmer
    }
}

/// Identity of the flash device, from DMI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashromInfo {
    /// Quirk device id; names the snapshot file.
    pub device_id: String,
    /// Product name.
    pub name: String,
    /// BIOS version.
    pub version: Option<String>,
    /// Hardware id GUID that matched.
    pub guid: String,
}

/// System firmware on SPI flash.
pub struct FlashromDevice<F: FlashProgrammer> {
    writer: SpiFlashWriter<F>,
    info: FlashromInfo,
    snapshot_dir: PathBuf,
}

impl<F: FlashProgrammer> FlashromDevice<F> {
    /// Create a device for a probed programmer.
    pub fn new(programmer: F, info: FlashromInfo) -> Result<Self> {
        Ok(Self {
            writer: SpiFlashWriter::new(programmer)?,
            info,
            snapshot_dir: PathBuf::from(SNAPSHOT_DIR),
        })
    }

    /// Store snapshots under `dir`.
    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Where [`FirmwareDevice::prepare`] keeps the original image.
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_dir
            .join(format!("flashrom-{}.bin", self.info.device_id))
    }

    /// The contract layer.
    pub fn writer(&self) -> &SpiFlashWriter<F> {
        &self.writer
    }
}

impl<F: FlashProgrammer> FirmwareDevice for FlashromDevice<F> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Flashrom
    }

    fn setup(&mut self) -> Result<()> {
        debug!(
            "{}: flash size {:#x}",
            self.info.name,
            self.writer
                .flash_size()
        );
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let path = self.snapshot_path();
        self.writer
            .snapshot(path)?;
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_firmware(&mut self, firmware: &[u8], progress: Progress<'_>) -> Result<()> {
        progress("write", 0, firmware.len());
        self.writer
            .write(firmware, BIOS_REGION)?;
        progress("write", firmware.len(), firmware.len());
        Ok(())
    }

    fn describe(&self) -> DeviceDescription {
        DeviceDescription {
            name: self
                .info
                .name
                .clone(),
            family: DeviceFamily::Flashrom,
            version: self
                .info
                .version
                .clone(),
            guids: vec![
                self.info
                    .guid
                    .clone(),
            ],
        }
    }
}
