//! # fwplug
//!
//! Device-side firmware update engines.
//!
//! Each engine negotiates a programming session over its own transport,
//! streams an image in the units the device expects, and decides success
//! from the device's own acknowledgements:
//!
//! - **QMI PDC modems**: carrier configurations (`mcfg.XX.VVV.mbn`) uploaded
//!   in 1 KiB chunks, each confirmed by an asynchronous indication
//! - **Wacom AES/EMR digitizers**: raw-HID feature-report bootloader with
//!   echo-checked command/response frames and busy polling
//! - **SPI flash**: full-image writes of the BIOS region through a flashrom
//!   programmer, after snapshotting the original contents
//!
//! All engines implement [`FirmwareDevice`]:
//! `setup → prepare → detach → write_firmware → attach`.
//!
//! ## Features
//!
//! - `native` (default): serial AT port via `serialport`, Linux hidraw nodes
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use fwplug::{DeviceFamily, WacomConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let firmware = std::fs::read("digitizer.bin")?;
//!
//!     #[cfg(all(feature = "native", target_os = "linux"))]
//!     {
//!         let family = DeviceFamily::WacomAes;
//!         let mut dev = family.create_hidraw_device("/dev/hidraw3", WacomConfig::default())?;
//!         dev.setup()?;
//!         dev.detach()?;
//!         dev.write_firmware(&firmware, &mut |phase, current, total| {
//!             println!("{phase}: {current}/{total}");
//!         })?;
//!         dev.attach()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod digest;
pub mod error;
pub mod image;
pub mod locker;
pub mod port;
pub mod protocol;
pub mod target;

// Re-exports for convenience
#[cfg(all(feature = "native", target_os = "linux"))]
pub use port::HidrawPort;
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    chunk::{Chunk, Chunks},
    digest::{is_erased, sha1_digest},
    error::{Error, Result},
    image::{Archive, ArchiveEntry, ArchiveReader, McfgName},
    locker::{DeviceLocker, Lockable},
    port::{HidPort, Port, SerialConfig},
    protocol::{QmiProtocolError, ReturnCode},
    target::{
        AesDevice, DeviceDescription, DeviceFamily, EmrDevice, FirmwareDevice, FlashromDevice,
        MmDevice, PdcConfig, PdcUpdater, ProbeInfo, Progress, SpiFlashWriter, WacomConfig,
        WacomDevice, WacomState,
    },
};
