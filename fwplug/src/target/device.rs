//! Device family selection and the common update interface.
//!
//! Every engine implements [`FirmwareDevice`], so a caller can drive a
//! modem, a Wacom digitizer or an SPI flash through the same lifecycle:
//! `setup → prepare → detach → write_firmware → attach`.

use {
    crate::{
        error::{Error, Result},
        port::HidPort,
        target::wacom::{AesDevice, EmrDevice, WacomConfig},
    },
    std::fmt,
};

/// Supported device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceFamily {
    /// Cellular modem loading carrier configurations over QMI PDC.
    ModemQmiPdc,
    /// Wacom AES digitizer on a raw-HID bootloader.
    WacomAes,
    /// Wacom EMR digitizer on a raw-HID bootloader.
    WacomEmr,
    /// SPI flash reached through a flashrom programmer.
    Flashrom,
}

/// USB vendor id of Wacom digitizers.
pub const WACOM_VENDOR_ID: u16 = 0x056A;

/// What a discovery layer knows about a device when picking its engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Kernel subsystem (`hidraw`, `modem`, `spi`).
    pub subsystem: String,
    /// USB vendor id, if any.
    pub vendor_id: Option<u16>,
    /// Device-type quirk, such as `aes` or `emr`.
    pub kind: Option<String>,
}

impl DeviceFamily {
    /// Get the device family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name
            .to_lowercase()
            .as_str()
        {
            "modem" | "qmi-pdc" | "qmi_pdc" => Some(Self::ModemQmiPdc),
            "aes" | "wacom-aes" | "wacom_aes" => Some(Self::WacomAes),
            "emr" | "wacom-emr" | "wacom_emr" => Some(Self::WacomEmr),
            "flashrom" | "spi" => Some(Self::Flashrom),
            _ => None,
        }
    }

    /// Pick the engine for a probed device.
    pub fn from_probe(probe: &ProbeInfo) -> Result<Self> {
        match probe
            .subsystem
            .as_str()
        {
            "hidraw" => {
                if probe.vendor_id != Some(WACOM_VENDOR_ID) {
                    return Err(Error::Unsupported(format!(
                        "hidraw vendor {:04x?} is not a Wacom device",
                        probe.vendor_id
                    )));
                }
                match probe
                    .kind
                    .as_deref()
                    .and_then(Self::from_name)
                {
                    Some(family @ (Self::WacomAes | Self::WacomEmr)) => Ok(family),
                    _ => Err(Error::Unsupported(
                        "Wacom device without an AES/EMR type".into(),
                    )),
                }
            },
            "modem" | "tty" | "usbmisc" => Ok(Self::ModemQmiPdc),
            "spi" | "flashrom" => Ok(Self::Flashrom),
            other => Err(Error::Unsupported(format!("subsystem {other}"))),
        }
    }

    /// Whether this family talks raw HID feature reports.
    pub fn is_hid(&self) -> bool {
        matches!(self, Self::WacomAes | Self::WacomEmr)
    }

    /// Create a raw-HID engine for this family on an existing port.
    pub fn create_hid_device<P: HidPort + 'static>(
        &self,
        port: P,
        config: WacomConfig,
    ) -> Result<Box<dyn FirmwareDevice>> {
        match self {
            Self::WacomAes => Ok(Box::new(AesDevice::new(port, config)?)),
            Self::WacomEmr => Ok(Box::new(EmrDevice::new(port, config)?)),
            _ => Err(Error::Unsupported(format!(
                "{self} is not a raw-HID device"
            ))),
        }
    }

    /// Create a raw-HID engine on a `/dev/hidrawN` node.
    #[cfg(all(feature = "native", target_os = "linux"))]
    pub fn create_hidraw_device(
        &self,
        path: &str,
        config: WacomConfig,
    ) -> Result<Box<dyn FirmwareDevice>> {
        self.create_hid_device(crate::port::HidrawPort::new(path), config)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModemQmiPdc => write!(f, "QMI PDC modem"),
            Self::WacomAes => write!(f, "Wacom AES"),
            Self::WacomEmr => write!(f, "Wacom EMR"),
            Self::Flashrom => write!(f, "flashrom"),
        }
    }
}

/// Minimal description of a device after setup.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceDescription {
    /// Human-readable name.
    pub name: String,
    /// Device family.
    pub family: DeviceFamily,
    /// Firmware version, if known.
    pub version: Option<String>,
    /// Instance ids / GUID strings published for the device.
    pub guids: Vec<String>,
}

/// Progress callback: `(phase, current, total)`.
pub type Progress<'a> = &'a mut dyn FnMut(&str, usize, usize);

/// Common update interface across all device families.
pub trait FirmwareDevice {
    /// Device family.
    fn family(&self) -> DeviceFamily;

    /// Read identity and version from the device.
    fn setup(&mut self) -> Result<()>;

    /// Prepare for an update (e.g. back up the current image).
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Switch the device into its programming mode.
    fn detach(&mut self) -> Result<()>;

    /// Write a firmware payload.
    ///
    /// # Arguments
    ///
    /// * `firmware` - The payload as shipped (image or archive bytes)
    /// * `progress` - Progress callback (phase, current, total)
    fn write_firmware(&mut self, firmware: &[u8], progress: Progress<'_>) -> Result<()>;

    /// Return the device to runtime mode.
    fn attach(&mut self) -> Result<()> {
        Ok(())
    }

    /// Describe the device.
    fn describe(&self) -> DeviceDescription;
}
