//! Wire formats spoken by the update engines.

pub mod at;
pub mod qmi;
pub mod wacom;

// Re-export common types
pub use qmi::{ConfigType, LoadConfigIndication, LoadConfigInput, OpenFlags, QmiProtocolError};
pub use wacom::{BlCommand, CommandFrame, ReturnCode, check_reply};
