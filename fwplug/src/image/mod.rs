//! Firmware containers and naming.

pub mod archive;
pub mod mcfg;

pub use archive::{Archive, ArchiveEntry, ArchiveReader};
pub use mcfg::McfgName;
