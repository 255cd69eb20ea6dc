//! In-memory QMI backend for loader tests.

use {
    crate::{
        error::{Error, Result},
        protocol::qmi::{LoadConfigIndication, LoadConfigInput, OpenFlags, QmiProtocolError},
        target::modem::qmi::{PdcClient, QmiBackend, QmiDevice},
    },
    async_trait::async_trait,
    std::{
        collections::VecDeque,
        path::Path,
        sync::{Arc, Mutex},
        time::Duration,
    },
    tokio::sync::broadcast,
};

/// A request as the modem saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentChunk {
    pub(crate) token: u32,
    pub(crate) id: [u8; 20],
    pub(crate) total_size: u32,
    pub(crate) len: usize,
}

/// Reaction of the modem to one request.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// Accept the request and publish this indication.
    Indicate(LoadConfigIndication),
    /// Accept the request and stay silent.
    Silent,
    /// Reject the request itself.
    Reject(QmiProtocolError),
}

#[derive(Default)]
pub(crate) struct Journal {
    pub(crate) events: Vec<String>,
    pub(crate) sent: Vec<SentChunk>,
    pub(crate) steps: VecDeque<Step>,
    pub(crate) fail: Vec<&'static str>,
}

impl Journal {
    fn log(&mut self, event: &str) -> Result<()> {
        self.events
            .push(event.to_string());
        if self
            .fail
            .contains(&event)
        {
            return Err(Error::Protocol(format!("{event} failed")));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    pub(crate) journal: Arc<Mutex<Journal>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make the named step (`device_new`, `open`, `allocate`, `release`,
    /// `close`) fail.
    pub(crate) fn fail_on(self, event: &'static str) -> Self {
        self.journal.lock().unwrap().fail.push(event);
        self
    }

    pub(crate) fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.journal.lock().unwrap().steps.extend(steps);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.journal.lock().unwrap().events.clone()
    }

    pub(crate) fn sent(&self) -> Vec<SentChunk> {
        self.journal.lock().unwrap().sent.clone()
    }
}

pub(crate) struct MockDevice {
    journal: Arc<Mutex<Journal>>,
}

pub(crate) struct MockClient {
    journal: Arc<Mutex<Journal>>,
    indications: broadcast::Sender<LoadConfigIndication>,
}

#[async_trait]
impl QmiBackend for MockBackend {
    type Device = MockDevice;

    async fn device_new(&self, _path: &Path) -> Result<MockDevice> {
        self.journal.lock().unwrap().log("device_new")?;
        Ok(MockDevice {
            journal: Arc::clone(&self.journal),
        })
    }
}

#[async_trait]
impl QmiDevice for MockDevice {
    type Client = MockClient;

    async fn open(&mut self, flags: OpenFlags, _timeout: Duration) -> Result<()> {
        assert_eq!(flags, OpenFlags::loader());
        self.journal.lock().unwrap().log("open")
    }

    async fn allocate_pdc_client(&mut self, _timeout: Duration) -> Result<MockClient> {
        self.journal.lock().unwrap().log("allocate")?;
        let (indications, _) = broadcast::channel(16);
        Ok(MockClient {
            journal: Arc::clone(&self.journal),
            indications,
        })
    }

    async fn release_client(&mut self, _client: MockClient, _timeout: Duration) -> Result<()> {
        self.journal.lock().unwrap().log("release")
    }

    async fn close(&mut self, _timeout: Duration) -> Result<()> {
        self.journal.lock().unwrap().log("close")
    }
}

#[async_trait]
impl PdcClient for MockClient {
    async fn load_config(&self, input: &LoadConfigInput<'_>, _timeout: Duration) -> Result<()> {
        let step = {
            let mut journal = self.journal.lock().unwrap();
            journal.sent.push(SentChunk {
                token: input.token,
                id: *input.id,
                total_size: input.total_size,
                len: input.chunk.len(),
            });
            journal.steps.pop_front().unwrap_or(Step::Silent)
        };
        match step {
            Step::Indicate(indication) => {
                let _ = self.indications.send(indication);
                Ok(())
            },
            Step::Silent => Ok(()),
            Step::Reject(code) => Err(Error::Qmi {
                op: "load config".into(),
                code,
            }),
        }
    }

    fn subscribe_load_config(&self) -> broadcast::Receiver<LoadConfigIndication> {
        self.indications.subscribe()
    }
}
