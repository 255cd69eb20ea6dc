//! Wacom AES digitizers.
//!
//! AES parts erase all code memory in one command and accept plain
//! write-flash frames.

use {
    crate::{
        error::Result,
        locker::DeviceLocker,
        port::HidPort,
        target::{
            device::{DeviceDescription, DeviceFamily, FirmwareDevice, Progress},
            wacom::{WacomConfig, WacomDevice},
        },
    },
    log::{debug, info},
};

/// Display name of AES parts.
pub const AES_DEVICE_NAME: &str = "Embedded Wacom AES Device";

/// Format the GUID published for a hardware id.
pub fn hwid_guid(hwid: u32) -> String {
    format!("WACOM\\HWID_{hwid:04X}")
}

/// Wacom AES update engine.
pub struct AesDevice<P: HidPort> {
    dev: WacomDevice<P>,
    version: Option<String>,
    hwid: Option<u32>,
}

impl<P: HidPort> AesDevice<P> {
    /// Create an engine for `port`.
    pub fn new(port: P, config: WacomConfig) -> Result<Self> {
        Ok(Self {
            dev: WacomDevice::new(port, config)?,
            version: None,
            hwid: None,
        })
    }

    /// Shared bootloader engine.
    pub fn device(&self) -> &WacomDevice<P> {
        &self.dev
    }

    /// Hardware id found during setup.
    pub fn hwid(&self) -> Option<u32> {
        self.hwid
    }
}

impl<P: HidPort> FirmwareDevice for AesDevice<P> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::WacomAes
    }

    fn setup(&mut self) -> Result<()> {
        let mut dev = DeviceLocker::new(&mut self.dev)?;
        let bootloader = dev.query_mode()?;
        let version = dev.read_version()?;
        info!("{AES_DEVICE_NAME} version {version}");
        self.version = Some(version);

        // The hardware id is optional; any failure just omits the GUID
        if !bootloader {
            match dev.obtain_hwid() {
                Ok(hwid) => self.hwid = hwid,
                Err(e) => debug!("failed to get HwID: {e}"),
            }
        }
        dev.close()
    }

    fn detach(&mut self) -> Result<()> {
        let mut dev = DeviceLocker::new(&mut self.dev)?;
        dev.detach()?;
        dev.close()
    }

    fn write_firmware(&mut self, firmware: &[u8], progress: Progress<'_>) -> Result<()> {
        let mut dev = DeviceLocker::new(&mut self.dev)?;
        let image = dev.pad_image(firmware)?;
        let blocks = dev.chunk(&image)?;
        info!("Writing {} blocks", blocks.len());
        dev.write_firmware(&blocks, progress)?;
        dev.close()
    }

    fn attach(&mut self) -> Result<()> {
        let mut dev = DeviceLocker::new(&mut self.dev)?;
        dev.attach()?;
        dev.close()
    }

    fn describe(&self) -> DeviceDescription {
        DeviceDescription {
            name: AES_DEVICE_NAME.to_string(),
            family: DeviceFamily::WacomAes,
            version: self
                .version
                .clone(),
            guids: self
                .hwid
                .map(hwid_guid)
                .into_iter()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            protocol::wacom::{FW_REPORT_ID, HWID_MAGIC, MAINTAIN_REPORT_ID, STATUS_REPORT_ID},
            target::wacom::{WacomState, mock::MockHid},
        },
        std::time::Duration,
    };

    fn fast_config() -> WacomConfig {
        WacomConfig::default()
            .with_waits(Duration::from_millis(1), Duration::from_millis(1))
            .with_erase_settle(Duration::ZERO)
            .with_detach_delay(Duration::ZERO)
    }

    fn runtime_hid() -> MockHid {
        let hid = MockHid::new();
        hid.push_reply(FW_REPORT_ID, &[0x02, 0x00]);
        let mut status = [0u8; 16];
        status[0] = STATUS_REPORT_ID;
        status[11..14].copy_from_slice(&[0x29, 0x01, 0x05]);
        hid.push_reply(STATUS_REPORT_ID, &status);
        hid
    }

    #[test]
    fn test_setup_runtime_with_hwid() {
        let hid = runtime_hid();
        let mut reply = vec![0u8; 64];
        reply[..8].copy_from_slice(&HWID_MAGIC);
        reply[8..12].copy_from_slice(&[0x34, 0x12, 0x78, 0x56]);
        hid.push_reply(MAINTAIN_REPORT_ID, &reply);

        let mut dev = AesDevice::new(hid.clone(), fast_config()).unwrap();
        dev.setup().unwrap();
        let desc = dev.describe();
        assert_eq!(desc.version.as_deref(), Some("0129.05"));
        assert_eq!(desc.guids, vec!["WACOM\\HWID_12345678".to_string()]);
        // Locker released the node
        assert!(!hid.is_open());
    }

    #[test]
    fn test_setup_without_hwid() {
        let hid = runtime_hid();
        hid.push_reply(MAINTAIN_REPORT_ID, &[0x09, 0xFF]);
        let mut dev = AesDevice::new(hid, fast_config()).unwrap();
        dev.setup().unwrap();
        assert!(dev.describe().guids.is_empty());
        assert_eq!(dev.hwid(), None);
    }

    #[test]
    fn test_setup_hwid_io_error_is_not_fatal() {
        // No maintenance reply scripted: the mock fails the read
        let hid = runtime_hid();
        let mut dev = AesDevice::new(hid, fast_config()).unwrap();
        dev.setup().unwrap();
        assert!(dev.describe().guids.is_empty());
    }

    #[test]
    fn test_setup_bootloader_version() {
        let hid = MockHid::new();
        hid.push_reply(FW_REPORT_ID, &[0x02, 0x02]);
        let mut dev = AesDevice::new(hid.clone(), fast_config()).unwrap();
        dev.setup().unwrap();
        assert_eq!(dev.describe().version.as_deref(), Some("0.0"));
        assert!(dev.device().is_bootloader());
        // No HWID probe in bootloader mode
        assert!(hid.sets().iter().all(|f| f[0] != MAINTAIN_REPORT_ID));
    }

    #[test]
    fn test_write_firmware_busy_erase() {
        let hid = MockHid::new().auto_reply(0x80);
        let mut dev = AesDevice::new(hid.clone(), fast_config()).unwrap();
        let err = dev
            .write_firmware(&[0u8; 512], &mut |_, _, _| {})
            .unwrap_err();
        assert!(err.return_code().is_some());
        assert_eq!(dev.device().state(), WacomState::Failed);
        assert_eq!(hid.sets().len(), 1);
        assert!(!hid.is_open());
    }

    #[test]
    fn test_write_firmware_pads_tail() {
        let hid = MockHid::new().auto_reply(0x00);
        let mut dev = AesDevice::new(hid.clone(), fast_config()).unwrap();
        dev.write_firmware(&[0x11; 200], &mut |_, _, _| {}).unwrap();
        let sets = hid.sets();
        // Erase plus two blocks
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[2].len(), 8 + 128);
        assert_eq!(sets[2][8 + 71], 0x11);
        assert_eq!(sets[2][8 + 72], 0xFF);
        assert_eq!(dev.device().state(), WacomState::Done);
    }
}
