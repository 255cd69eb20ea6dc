//! Cellular modems.

pub mod device;
pub mod pdc;
pub mod qmi;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(feature = "native")]
pub use device::NativeAtOpener;
pub use {
    device::{
        ArchiveExtractor, AtPortOpener, MmDevice, ModemInhibitor, ModemPort, ModemProperties,
        PortKind, UpdateMethods,
    },
    pdc::{PdcConfig, PdcUpdater},
    qmi::{PdcClient, QmiBackend, QmiDevice},
};
