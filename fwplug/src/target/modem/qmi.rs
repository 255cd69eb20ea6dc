//! QMI device channel abstraction.
//!
//! The IPC implementation (libqmi, qmi-proxy, ...) lives outside this crate.
//! It is reached through three async traits mirroring its object model:
//! a backend creates devices, a device hands out PDC clients, and a client
//! sends `LoadConfig` requests and publishes `LoadConfig` indications.

use {
    crate::{
        error::Result,
        protocol::qmi::{LoadConfigIndication, LoadConfigInput, OpenFlags},
    },
    async_trait::async_trait,
    std::{path::Path, time::Duration},
    tokio::sync::broadcast,
};

/// Factory for QMI device channels.
#[async_trait]
pub trait QmiBackend: Send + Sync {
    /// Device channel type.
    type Device: QmiDevice;

    /// Create (but do not open) a channel on the control node at `path`.
    async fn device_new(&self, path: &Path) -> Result<Self::Device>;
}

/// An open-able QMI control channel.
#[async_trait]
pub trait QmiDevice: Send + Sync {
    /// PDC client type.
    type Client: PdcClient;

    /// Open the channel.
    async fn open(&mut self, flags: OpenFlags, timeout: Duration) -> Result<()>;

    /// Allocate a client for the PDC service.
    async fn allocate_pdc_client(&mut self, timeout: Duration) -> Result<Self::Client>;

    /// Release a client and its client id.
    async fn release_client(&mut self, client: Self::Client, timeout: Duration) -> Result<()>;

    /// Close the channel.
    async fn close(&mut self, timeout: Duration) -> Result<()>;
}

/// Client of the Persistent Device Configuration service.
#[async_trait]
pub trait PdcClient: Send + Sync {
    /// Send a `LoadConfig` request; resolves once the modem accepted it.
    async fn load_config(&self, input: &LoadConfigInput<'_>, timeout: Duration) -> Result<()>;

    /// Subscribe to `LoadConfig` indications.
    ///
    /// Only indications published after the call are received.
    fn subscribe_load_config(&self) -> broadcast::Receiver<LoadConfigIndication>;
}
