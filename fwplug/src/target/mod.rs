//! Update engines, one submodule per device family.
//!
//! Callers pick an engine with [`DeviceFamily::from_probe`] and then drive
//! it through the [`FirmwareDevice`] lifecycle.

pub mod device;
pub mod flashrom;
pub mod modem;
pub mod wacom;

pub use {
    device::{
        DeviceDescription, DeviceFamily, FirmwareDevice, ProbeInfo, Progress, WACOM_VENDOR_ID,
    },
    flashrom::{FlashLayout, FlashProgrammer, FlashRegion, FlashromDevice, FlashromInfo, SpiFlashWriter},
    modem::{MmDevice, PdcConfig, PdcUpdater},
    wacom::{AesDevice, CmdFlags, EmrDevice, WacomConfig, WacomDevice, WacomState},
};
