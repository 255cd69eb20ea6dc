//! Carrier configuration loader over QMI PDC.
//!
//! ## Transfer
//!
//! ```text
//! host                                   modem
//!  | -- LoadConfig{token, sha1, size, chunk} --> |
//!  | <------------- response (result) ---------- |
//!  | <------- indication{remaining_size} ------- |   up to 5 s
//!  | -- LoadConfig{token+1, ..., next chunk} --> |
//!  |                     ...                     |
//!  | <------- indication{remaining_size=0} ----- |
//! ```
//!
//! Each of [`PdcUpdater::open`], [`PdcUpdater::close`] and
//! [`PdcUpdater::write`] runs a private current-thread tokio runtime and
//! blocks until the exchange reaches a terminal state.

use {
    crate::{
        chunk::Chunks,
        digest::{SHA1_LEN, sha1_digest},
        error::{Error, Result},
        image::{ArchiveReader, McfgName},
        locker::Lockable,
        protocol::qmi::{
            ConfigType, LOAD_CONFIG_CHUNK_SIZE, LoadConfigIndication, LoadConfigInput, OpenFlags,
            QmiProtocolError,
        },
        target::{
            device::Progress,
            modem::qmi::{PdcClient, QmiBackend, QmiDevice},
        },
    },
    log::{debug, info, trace, warn},
    std::{
        future::Future,
        path::{Path, PathBuf},
        time::Duration,
    },
    tokio::{runtime, sync::broadcast},
};

type ClientOf<B> = <<B as QmiBackend>::Device as QmiDevice>::Client;

/// Loader timeouts and chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PdcConfig {
    /// Bytes per `LoadConfig` request.
    pub chunk_size: usize,
    /// Opening the channel.
    pub open_timeout: Duration,
    /// Allocating the PDC client.
    pub allocate_timeout: Duration,
    /// Releasing the PDC client.
    pub release_timeout: Duration,
    /// Closing the channel.
    pub close_timeout: Duration,
    /// Response to a `LoadConfig` request.
    pub request_timeout: Duration,
    /// Indication confirming a chunk.
    pub indication_timeout: Duration,
}

impl Default for PdcConfig {
    fn default() -> Self {
        Self {
            chunk_size: LOAD_CONFIG_CHUNK_SIZE,
            open_timeout: Duration::from_secs(15),
            allocate_timeout: Duration::from_secs(5),
            release_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            indication_timeout: Duration::from_secs(5),
        }
    }
}

impl PdcConfig {
    /// Set the chunk size, clamped to `1..=LOAD_CONFIG_CHUNK_SIZE`.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, LOAD_CONFIG_CHUNK_SIZE);
        self
    }

    /// Check values that may have been set directly or deserialized.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > LOAD_CONFIG_CHUNK_SIZE {
            return Err(Error::InvalidInput(format!(
                "chunk size {} outside 1..={LOAD_CONFIG_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        Ok(())
    }

    /// Set the indication timeout.
    #[must_use]
    pub fn with_indication_timeout(mut self, timeout: Duration) -> Self {
        self.indication_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Build the event loop for one call.
fn event_loop() -> Result<runtime::Runtime> {
    Ok(runtime::Builder::new_current_thread()
        .enable_time()
        .build()?)
}

async fn timed<T, F>(op: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("{op} timed out after {limit:?}")))?
}

/// QMI PDC session on one control node.
pub struct PdcUpdater<'a, B: QmiBackend> {
    backend: &'a B,
    path: PathBuf,
    config: PdcConfig,
    device: Option<B::Device>,
    client: Option<ClientOf<B>>,
}

impl<'a, B: QmiBackend> PdcUpdater<'a, B> {
    /// Create a closed updater for the control node at `path`.
    pub fn new(backend: &'a B, path: impl AsRef<Path>) -> Self {
        Self {
            backend,
            path: path
                .as_ref()
                .to_path_buf(),
            config: PdcConfig::default(),
            device: None,
            client: None,
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: PdcConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether channel and client are held.
    pub fn is_open(&self) -> bool {
        self.device
            .is_some()
            && self
                .client
                .is_some()
    }

    /// Create and open the channel, then allocate a PDC client.
    ///
    /// On failure nothing is held; a channel that was already opened is
    /// closed again (errors from that close are ignored).
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        debug!("opening QMI device {}", self.path.display());
        let rt = event_loop()?;
        let (device, client) = rt.block_on(open_session(self.backend, &self.path, &self.config))?;
        self.device = Some(device);
        self.client = Some(client);
        Ok(())
    }

    /// Release the client, then close the channel.
    ///
    /// Both steps always run. The release error wins when both fail.
    pub fn close(&mut self) -> Result<()> {
        let client = self
            .client
            .take();
        let Some(device) = self
            .device
            .take()
        else {
            return Ok(());
        };
        debug!("closing QMI device {}", self.path.display());
        let rt = event_loop()?;
        rt.block_on(close_session(device, client, &self.config))
    }

    /// Upload one configuration blob.
    pub fn write(&mut self, filename: &str, blob: &[u8], progress: Progress<'_>) -> Result<()> {
        let name = McfgName::parse(filename)?;
        if blob.is_empty() {
            return Err(Error::InvalidInput(format!("{filename} is empty")));
        }
        let total_size = u32::try_from(blob.len())
            .map_err(|_| Error::InvalidInput(format!("{filename} is too large")))?;
        self.config
            .validate()?;
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::Protocol("QMI PDC updater is not open".into()))?;

        let session = TransferSession {
            client,
            name,
            config: &self.config,
            phase: filename,
            id: sha1_digest(blob),
            blob,
            total_size,
            token: 0,
        };
        let rt = event_loop()?;
        rt.block_on(session.run(progress))
    }

    /// Upload every `mcfg.*.mbn` entry of an archive in encounter order.
    ///
    /// The first failure stops the batch; blobs loaded before it stay
    /// loaded. Returns the number of blobs written.
    pub fn write_archive(
        &mut self,
        archive: &dyn ArchiveReader,
        progress: Progress<'_>,
    ) -> Result<usize> {
        let entries: Vec<_> = archive
            .entries()
            .iter()
            .filter(|e| McfgName::is_candidate(&e.name))
            .collect();

        for (i, entry) in entries
            .iter()
            .enumerate()
        {
            debug!("writing mcfg file '{}'", entry.name);
            if let Err(e) = self.write(&entry.name, &entry.data, progress) {
                warn!("failed to write file '{}': {e}", entry.name);
                for skipped in &entries[i + 1..] {
                    warn!(
                        "skipping mcfg file '{}': aborted due to previous error",
                        skipped.name
                    );
                }
                return Err(Error::Batch {
                    name: entry
                        .name
                        .clone(),
                    source: Box::new(e),
                });
            }
        }
        Ok(entries.len())
    }
}

impl<B: QmiBackend> Lockable for PdcUpdater<'_, B> {
    fn open(&mut self) -> Result<()> {
        PdcUpdater::open(self)
    }

    fn close(&mut self) -> Result<()> {
        PdcUpdater::close(self)
    }
}

impl<B: QmiBackend> Drop for PdcUpdater<'_, B> {
    fn drop(&mut self) {
        if self.device.is_some() {
            warn!("QMI PDC updater dropped while open");
            if let Err(e) = self.close() {
                warn!("failed to close QMI device: {e}");
            }
        }
    }
}

async fn open_session<B: QmiBackend>(
    backend: &B,
    path: &Path,
    config: &PdcConfig,
) -> Result<(B::Device, ClientOf<B>)> {
    let mut device = backend
        .device_new(path)
        .await?;
    timed(
        "open QMI device",
        config.open_timeout,
        device.open(OpenFlags::loader(), config.open_timeout),
    )
    .await?;

    let allocated = timed(
        "allocate PDC client",
        config.allocate_timeout,
        device.allocate_pdc_client(config.allocate_timeout),
    )
    .await;
    match allocated {
        Ok(client) => Ok((device, client)),
        Err(e) => {
            // The allocation error is the one worth reporting
            if let Err(close_err) = timed(
                "close QMI device",
                config.close_timeout,
                device.close(config.close_timeout),
            )
            .await
            {
                debug!("ignoring close error during open abort: {close_err}");
            }
            Err(e)
        },
    }
}

async fn close_session<D: QmiDevice>(
    mut device: D,
    client: Option<D::Client>,
    config: &PdcConfig,
) -> Result<()> {
    let released = match client {
        Some(client) => {
            timed(
                "release PDC client",
                config.release_timeout,
                device.release_client(client, config.release_timeout),
            )
            .await
        },
        None => Ok(()),
    };
    let closed = timed(
        "close QMI device",
        config.close_timeout,
        device.close(config.close_timeout),
    )
    .await;
    released.and(closed)
}

/// What the modem asked for after a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    /// Transfer finished.
    Done,
    /// The modem already holds this configuration.
    AlreadyLoaded,
    /// This many bytes are still expected.
    More(u32),
}

fn classify(indication: &LoadConfigIndication) -> Result<Next> {
    let code = indication.result_code;
    if code == QmiProtocolError::INVALID_QOS_ID {
        return Ok(Next::AlreadyLoaded);
    }
    if !code.is_success() {
        return Err(Error::Qmi {
            op: "couldn't load mcfg".into(),
            code,
        });
    }
    if indication.frame_reset == Some(true) {
        return Err(Error::Protocol(
            "couldn't load mcfg: sent data discarded".into(),
        ));
    }
    match indication.remaining_size {
        None => Err(Error::Protocol(
            "couldn't load remaining size: missing from indication".into(),
        )),
        Some(0) => Ok(Next::Done),
        Some(remaining) => Ok(Next::More(remaining)),
    }
}

/// State of one blob upload.
struct TransferSession<'s, C: PdcClient> {
    client: &'s C,
    name: McfgName,
    config: &'s PdcConfig,
    phase: &'s str,
    id: [u8; SHA1_LEN],
    blob: &'s [u8],
    total_size: u32,
    token: u32,
}

impl<C: PdcClient> TransferSession<'_, C> {
    async fn run(mut self, progress: Progress<'_>) -> Result<()> {
        let total = self
            .blob
            .len();
        let mut chunks = Chunks::new(self.blob, self.config.chunk_size, 0)?;
        info!(
            "writing MCFG for operator '{}', version '{:03}'",
            self.name.carrier_id, self.name.version
        );

        loop {
            let Some(chunk) = chunks.next() else {
                // The modem wants more than the blob holds
                return Err(Error::Protocol(format!(
                    "modem expects more of mcfg {} after {total} bytes",
                    self.name
                )));
            };
            let end = chunk.offset + chunk.len();

            // Subscribe before sending so the indication cannot be missed
            let mut indications = self
                .client
                .subscribe_load_config();
            let input = LoadConfigInput {
                token: self.token,
                config_type: ConfigType::Software,
                id: &self.id,
                total_size: self.total_size,
                chunk: chunk.data,
            };
            self.token = self
                .token
                .wrapping_add(1);

            debug!("uploading [{},{end}] of {total}", chunk.offset);
            timed(
                "load config request",
                self.config
                    .request_timeout,
                self.client
                    .load_config(
                        &input,
                        self.config
                            .request_timeout,
                    ),
            )
            .await
            .map_err(|e| match e {
                Error::Timeout(msg) => Error::Timeout(format!("{msg} at offset {}", chunk.offset)),
                other => other,
            })?;

            let indication = self
                .wait_indication(&mut indications)
                .await?;
            drop(indications);
            trace!("indication: {indication:?}");

            match classify(&indication)? {
                Next::Done => {
                    debug!("finished loading mcfg {}", self.name);
                    progress(self.phase, total, total);
                    return Ok(());
                },
                Next::AlreadyLoaded => {
                    debug!("mcfg {} already available in device", self.name);
                    progress(self.phase, total, total);
                    return Ok(());
                },
                Next::More(remaining) => {
                    debug!("loading next chunk ({remaining} bytes remaining)");
                    progress(self.phase, end, total);
                },
            }
        }
    }

    async fn wait_indication(
        &self,
        rx: &mut broadcast::Receiver<LoadConfigIndication>,
    ) -> Result<LoadConfigIndication> {
        let wait = async {
            loop {
                match rx
                    .recv()
                    .await
                {
                    Ok(indication) => return Ok(indication),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("missed {n} load-config indications");
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Protocol("indication channel closed".into()));
                    },
                }
            }
        };
        tokio::time::timeout(
            self.config
                .indication_timeout,
            wait,
        )
        .await
        .map_err(|_| Error::Timeout("couldn't load mcfg: timed out".into()))?
    }
}
