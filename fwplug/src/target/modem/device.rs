//! Mobile broadband device managed by ModemManager.
//!
//! The modem advertises how it can be updated. `fastboot` means an AT
//! command reboots it into a fastboot loader; `qmi-pdc` means carrier
//! configurations are pushed over QMI PDC from an archive of `mcfg.*.mbn`
//! files.

use {
    crate::{
        error::{Error, Result},
        image::Archive,
        locker::{DeviceLocker, Lockable},
        port::Port,
        protocol::at,
        target::{
            device::{DeviceDescription, DeviceFamily, FirmwareDevice, Progress},
            modem::{
                pdc::{PdcConfig, PdcUpdater},
                qmi::QmiBackend,
            },
        },
    },
    bitflags::bitflags,
    log::{debug, info, warn},
    std::{fmt, time::Duration},
};

bitflags! {
    /// Update methods a modem supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateMethods: u32 {
        /// Reboot into fastboot via an AT command.
        const FASTBOOT = 1 << 0;
        /// Load carrier configurations over QMI PDC.
        const QMI_PDC = 1 << 1;
    }
}

/// Kind of a modem control port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortKind {
    /// AT command port.
    At,
    /// QMI control port.
    Qmi,
    /// MBIM control port (QMI tunnelled over MBIM).
    Mbim,
    /// Anything else (GPS, audio, ...).
    Other,
}

/// A port exposed by the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModemPort {
    /// Kernel name, e.g. `ttyUSB2` or `cdc-wdm0`.
    pub name: String,
    /// Port kind.
    pub kind: PortKind,
}

impl ModemPort {
    /// Create a port description.
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    fn dev_path(&self) -> String {
        format!("/dev/{}", self.name)
    }
}

/// What ModemManager reports about a modem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModemProperties {
    /// Physical device id; also the inhibition uid.
    pub device: String,
    /// Manufacturer.
    pub manufacturer: String,
    /// Model, used as the device name.
    pub model: String,
    /// Supported update methods.
    pub update_methods: UpdateMethods,
    /// AT command that reboots into fastboot.
    pub fastboot_at: Option<String>,
    /// Device ids published as GUIDs.
    pub device_ids: Vec<String>,
    /// Firmware plus configuration version.
    pub version: Option<String>,
    /// Control ports.
    pub ports: Vec<ModemPort>,
}

/// Opens the serial AT port.
pub trait AtPortOpener {
    /// Open the port at `path`.
    fn open_port(&self, path: &str) -> Result<Box<dyn Port>>;
}

impl<F> AtPortOpener for F
where
    F: Fn(&str) -> Result<Box<dyn Port>>,
{
    fn open_port(&self, path: &str) -> Result<Box<dyn Port>> {
        self(path)
    }
}

/// Opens AT ports with the `serialport` crate.
#[cfg(feature = "native")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeAtOpener;

#[cfg(feature = "native")]
impl AtPortOpener for NativeAtOpener {
    fn open_port(&self, path: &str) -> Result<Box<dyn Port>> {
        let config = crate::port::SerialConfig::new(path);
        Ok(Box::new(crate::port::NativePort::open(&config)?))
    }
}

/// Turns the update payload into named blobs.
pub trait ArchiveExtractor {
    /// Extract `payload`, ignoring directory components.
    fn extract(&self, payload: &[u8]) -> Result<Archive>;
}

impl<F> ArchiveExtractor for F
where
    F: Fn(&[u8]) -> Result<Archive>,
{
    fn extract(&self, payload: &[u8]) -> Result<Archive> {
        self(payload)
    }
}

/// Keeps the connection manager away from a modem during an update.
pub trait ModemInhibitor {
    /// Stop managing the modem with this uid.
    fn inhibit(&mut self, uid: &str) -> Result<()>;

    /// Resume managing it.
    fn uninhibit(&mut self, uid: &str) -> Result<()>;
}

/// Serial AT channel with an open/close lifecycle.
struct AtChannel<'a> {
    path: &'a str,
    opener: &'a dyn AtPortOpener,
    timeout: Duration,
    port: Option<Box<dyn Port>>,
}

impl AtChannel<'_> {
    fn command(&mut self, cmd: &str) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Protocol(format!("{} is not open", self.path)))?;
        at::send_command(port.as_mut(), cmd, self.timeout)
    }
}

impl Lockable for AtChannel<'_> {
    fn open(&mut self) -> Result<()> {
        if self
            .port
            .is_none()
        {
            self.port = Some(
                self.opener
                    .open_port(self.path)?,
            );
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self
            .port
            .take()
        {
            Some(mut port) => port.close(),
            None => Ok(()),
        }
    }
}

/// A modem updated through fastboot detach and QMI PDC configuration loads.
pub struct MmDevice<B: QmiBackend> {
    props: ModemProperties,
    backend: B,
    at_opener: Box<dyn AtPortOpener>,
    extractor: Box<dyn ArchiveExtractor>,
    inhibitor: Option<Box<dyn ModemInhibitor>>,
    inhibited: Option<String>,
    fastboot_at: String,
    port_at: String,
    port_qmi: Option<String>,
    pdc_config: PdcConfig,
    at_timeout: Duration,
}

impl<B: QmiBackend> fmt::Debug for MmDevice<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmDevice")
            .field("model", &self.props.model)
            .field("methods", &self.props.update_methods)
            .field("port_at", &self.port_at)
            .field("port_qmi", &self.port_qmi)
            .finish_non_exhaustive()
    }
}

impl<B: QmiBackend> MmDevice<B> {
    /// Validate what ModemManager reported and pick the ports to use.
    pub fn probe(
        props: ModemProperties,
        backend: B,
        at_opener: Box<dyn AtPortOpener>,
        extractor: Box<dyn ArchiveExtractor>,
    ) -> Result<Self> {
        let methods = props.update_methods;
        if methods.is_empty() {
            return Err(Error::Unsupported(
                "modem cannot be put in programming mode".into(),
            ));
        }

        // QMI PDC is not expected to be supported on its own
        if !methods.contains(UpdateMethods::FASTBOOT) {
            return Err(Error::Unsupported(format!(
                "modem detach method {methods:?} not supported"
            )));
        }
        let fastboot_at = props
            .fastboot_at
            .clone()
            .ok_or_else(|| Error::Unsupported("modem does not set fastboot command".into()))?;

        if props
            .device_ids
            .is_empty()
        {
            return Err(Error::Unsupported(
                "modem did not specify any device IDs".into(),
            ));
        }
        if props
            .version
            .is_none()
        {
            return Err(Error::Unsupported(
                "modem did not specify a firmware version".into(),
            ));
        }

        let port_at = props
            .ports
            .iter()
            .find(|p| p.kind == PortKind::At)
            .map(ModemPort::dev_path)
            .ok_or_else(|| Error::Unsupported("failed to find AT port".into()))?;

        let port_qmi = if methods.contains(UpdateMethods::QMI_PDC) {
            let port = props
                .ports
                .iter()
                .find(|p| matches!(p.kind, PortKind::Qmi | PortKind::Mbim))
                .map(ModemPort::dev_path)
                .ok_or_else(|| Error::Unsupported("failed to find QMI port".into()))?;
            Some(port)
        } else {
            None
        };

        debug!("modem {} at {port_at}, qmi {port_qmi:?}", props.model);
        Ok(Self {
            props,
            backend,
            at_opener,
            extractor,
            inhibitor: None,
            inhibited: None,
            fastboot_at,
            port_at,
            port_qmi,
            pdc_config: PdcConfig::default(),
            at_timeout: at::AT_TIMEOUT,
        })
    }

    /// Inhibit the modem in the connection manager while updating.
    #[must_use]
    pub fn with_inhibitor(mut self, inhibitor: Box<dyn ModemInhibitor>) -> Self {
        self.inhibitor = Some(inhibitor);
        self
    }

    /// Override the QMI PDC loader settings.
    #[must_use]
    pub fn with_pdc_config(mut self, config: PdcConfig) -> Self {
        self.pdc_config = config;
        self
    }

    /// Override the AT command timeout.
    #[must_use]
    pub fn with_at_timeout(mut self, timeout: Duration) -> Self {
        self.at_timeout = timeout;
        self
    }

    /// Reported properties.
    pub fn properties(&self) -> &ModemProperties {
        &self.props
    }

    /// AT port path.
    pub fn at_port(&self) -> &str {
        &self.port_at
    }

    /// QMI port path, when QMI PDC is supported.
    pub fn qmi_port(&self) -> Option<&str> {
        self.port_qmi
            .as_deref()
    }

    fn inhibit(&mut self) -> Result<()> {
        let Some(inhibitor) = self
            .inhibitor
            .as_mut()
        else {
            return Ok(());
        };
        let uid = self
            .props
            .device
            .clone();
        debug!("inhibit {uid}");
        inhibitor.inhibit(&uid)?;
        self.inhibited = Some(uid);
        Ok(())
    }

    fn uninhibit(&mut self) {
        let (Some(inhibitor), Some(uid)) = (
            self.inhibitor
                .as_mut(),
            self.inhibited
                .take(),
        ) else {
            return;
        };
        debug!("uninhibit {uid}");
        if let Err(e) = inhibitor.uninhibit(&uid) {
            warn!("failed uninhibiting {uid}: {e}");
        }
    }

    fn detach_fastboot(&mut self) -> Result<()> {
        let mut channel = AtChannel {
            path: &self.port_at,
            opener: self
                .at_opener
                .as_ref(),
            timeout: self.at_timeout,
            port: None,
        };
        let mut channel = DeviceLocker::new(&mut channel)?;
        channel.command("AT")?;
        channel
            .command(&self.fastboot_at)
            .map_err(|e| {
                Error::Unsupported(format!("rebooting into fastboot not supported: {e}"))
            })?;
        info!("modem rebooting into fastboot");
        channel.close()
    }

    fn write_qmi_pdc(&mut self, payload: &[u8], progress: Progress<'_>) -> Result<()> {
        let archive = self
            .extractor
            .extract(payload)?;
        let path = self
            .port_qmi
            .as_deref()
            .ok_or_else(|| Error::Unsupported("no QMI port".into()))?;

        let mut updater =
            PdcUpdater::new(&self.backend, path).with_config(self.pdc_config.clone());
        let mut updater = DeviceLocker::new(&mut updater)?;
        let written = updater.write_archive(&archive, progress)?;
        info!("loaded {written} carrier configuration(s)");
        updater.close()
    }
}

impl<B: QmiBackend> FirmwareDevice for MmDevice<B> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::ModemQmiPdc
    }

    fn setup(&mut self) -> Result<()> {
        info!(
            "{} {} version {}",
            self.props.manufacturer,
            self.props.model,
            self.props
                .version
                .as_deref()
                .unwrap_or("unknown")
        );
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.inhibit()?;

        // QMI PDC needs no detach
        if self
            .props
            .update_methods
            .contains(UpdateMethods::QMI_PDC)
        {
            return Ok(());
        }
        self.detach_fastboot()
    }

    fn write_firmware(&mut self, firmware: &[u8], progress: Progress<'_>) -> Result<()> {
        if self
            .props
            .update_methods
            .contains(UpdateMethods::QMI_PDC)
        {
            return self.write_qmi_pdc(firmware, progress);
        }
        Err(Error::Unsupported("unsupported update method".into()))
    }

    fn attach(&mut self) -> Result<()> {
        self.uninhibit();
        Ok(())
    }

    fn describe(&self) -> DeviceDescription {
        DeviceDescription {
            name: self
                .props
                .model
                .clone(),
            family: DeviceFamily::ModemQmiPdc,
            version: self
                .props
                .version
                .clone(),
            guids: self
                .props
                .device_ids
                .clone(),
        }
    }
}

impl<B: QmiBackend> Drop for MmDevice<B> {
    fn drop(&mut self) {
        self.uninhibit();
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            port::MockPort,
            protocol::qmi::LoadConfigIndication,
            target::modem::mock::{MockBackend, Step},
        },
        std::{
            collections::VecDeque,
            io::{Read, Write},
            sync::{Arc, Mutex},
        },
    };

    /// Mock serial port that answers each command line with the next
    /// scripted reply and stays inspectable after the device drops it.
    #[derive(Clone)]
    struct SharedPort {
        port: Arc<Mutex<MockPort>>,
        replies: Arc<Mutex<VecDeque<&'static [u8]>>>,
    }

    impl SharedPort {
        fn new(replies: &[&'static [u8]]) -> Self {
            Self {
                port: Arc::new(Mutex::new(MockPort::new("ttyUSB2"))),
                replies: Arc::new(Mutex::new(replies.iter().copied().collect())),
            }
        }
    }

    impl Read for SharedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.port.lock().unwrap().read(buf)
        }
    }

    impl Write for SharedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut port = self.port.lock().unwrap();
            let n = port.write(buf)?;
            if buf.ends_with(b"\r\n") {
                if let Some(reply) = self.replies.lock().unwrap().pop_front() {
                    port.push_read(reply);
                }
            }
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for SharedPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.port.lock().unwrap().set_timeout(timeout)
        }

        fn timeout(&self) -> Duration {
            self.port.lock().unwrap().timeout()
        }

        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn close(&mut self) -> Result<()> {
            self.port.lock().unwrap().close()
        }
    }

    #[derive(Default)]
    struct RecordingInhibitor(Arc<Mutex<Vec<String>>>);

    impl ModemInhibitor for RecordingInhibitor {
        fn inhibit(&mut self, uid: &str) -> Result<()> {
            self.0.lock().unwrap().push(format!("inhibit {uid}"));
            Ok(())
        }

        fn uninhibit(&mut self, uid: &str) -> Result<()> {
            self.0.lock().unwrap().push(format!("uninhibit {uid}"));
            Ok(())
        }
    }

    fn props(methods: UpdateMethods) -> ModemProperties {
        ModemProperties {
            device: "/sys/devices/usb1/1-2".into(),
            manufacturer: "Quectel".into(),
            model: "EM160R".into(),
            update_methods: methods,
            fastboot_at: Some("AT+QFASTBOOT".into()),
            device_ids: vec!["USB\\VID_2C7C&PID_0620".into()],
            version: Some("EM160RGLAUR02A07M4G_01.001".into()),
            ports: vec![
                ModemPort::new("ttyUSB0", PortKind::Other),
                ModemPort::new("ttyUSB2", PortKind::At),
                ModemPort::new("cdc-wdm0", PortKind::Qmi),
            ],
        }
    }

    fn no_port() -> Box<dyn AtPortOpener> {
        Box::new(|path: &str| -> Result<Box<dyn Port>> {
            Err(Error::Unsupported(format!("unexpected open of {path}")))
        })
    }

    fn archive_of(archive: Archive) -> Box<dyn ArchiveExtractor> {
        Box::new(move |_: &[u8]| -> Result<Archive> { Ok(archive.clone()) })
    }

    fn probe(props: ModemProperties, backend: MockBackend) -> Result<MmDevice<MockBackend>> {
        MmDevice::probe(props, backend, no_port(), archive_of(Archive::new()))
    }

    #[test]
    fn test_probe_picks_ports() {
        let dev = probe(
            props(UpdateMethods::FASTBOOT | UpdateMethods::QMI_PDC),
            MockBackend::new(),
        )
        .unwrap();
        assert_eq!(dev.at_port(), "/dev/ttyUSB2");
        assert_eq!(dev.qmi_port(), Some("/dev/cdc-wdm0"));
        let desc = dev.describe();
        assert_eq!(desc.name, "EM160R");
        assert_eq!(desc.guids.len(), 1);
    }

    #[test]
    fn test_probe_rejections() {
        let backend = MockBackend::new();
        assert!(probe(props(UpdateMethods::empty()), backend.clone()).is_err());
        // QMI PDC alone is not enough
        assert!(probe(props(UpdateMethods::QMI_PDC), backend.clone()).is_err());

        let mut p = props(UpdateMethods::FASTBOOT);
        p.fastboot_at = None;
        assert!(probe(p, backend.clone()).is_err());

        let mut p = props(UpdateMethods::FASTBOOT);
        p.device_ids.clear();
        assert!(probe(p, backend.clone()).is_err());

        let mut p = props(UpdateMethods::FASTBOOT);
        p.version = None;
        assert!(probe(p, backend.clone()).is_err());

        let mut p = props(UpdateMethods::FASTBOOT);
        p.ports.retain(|port| port.kind != PortKind::At);
        let err = probe(p, backend.clone()).unwrap_err();
        assert!(err.to_string().contains("AT port"));

        let mut p = props(UpdateMethods::FASTBOOT | UpdateMethods::QMI_PDC);
        p.ports.retain(|port| port.kind != PortKind::Qmi);
        let err = probe(p, backend).unwrap_err();
        assert!(err.to_string().contains("QMI port"));
    }

    #[test]
    fn test_probe_accepts_mbim_port() {
        let mut p = props(UpdateMethods::FASTBOOT | UpdateMethods::QMI_PDC);
        p.ports = vec![
            ModemPort::new("ttyUSB2", PortKind::At),
            ModemPort::new("cdc-wdm1", PortKind::Mbim),
        ];
        let dev = probe(p, MockBackend::new()).unwrap();
        assert_eq!(dev.qmi_port(), Some("/dev/cdc-wdm1"));
    }

    #[test]
    fn test_detach_fastboot_sends_commands() {
        let shared = SharedPort::new(&[b"\r\nOK\r\n", b"\r\nOK\r\n"]);
        let opener = {
            let shared = shared.clone();
            Box::new(move |path: &str| -> Result<Box<dyn Port>> {
                assert_eq!(path, "/dev/ttyUSB2");
                Ok(Box::new(shared.clone()))
            })
        };
        let mut dev = MmDevice::probe(
            props(UpdateMethods::FASTBOOT),
            MockBackend::new(),
            opener,
            archive_of(Archive::new()),
        )
        .unwrap()
        .with_at_timeout(Duration::from_millis(20));
        dev.detach().unwrap();

        let port = shared.port.lock().unwrap();
        assert_eq!(port.written(), b"AT\r\nAT+QFASTBOOT\r\n");
        assert!(port.closed);
    }

    #[test]
    fn test_detach_fastboot_rejected() {
        let shared = SharedPort::new(&[b"\r\nOK\r\n", b"\r\nERROR\r\n"]);
        let opener = {
            let shared = shared.clone();
            Box::new(move |_: &str| -> Result<Box<dyn Port>> { Ok(Box::new(shared.clone())) })
        };
        let mut dev = MmDevice::probe(
            props(UpdateMethods::FASTBOOT),
            MockBackend::new(),
            opener,
            archive_of(Archive::new()),
        )
        .unwrap()
        .with_at_timeout(Duration::from_millis(20));
        let err = dev.detach().unwrap_err();
        assert!(err.to_string().contains("fastboot not supported"));
        // Locker still closed the port
        assert!(shared.port.lock().unwrap().closed);
    }

    #[test]
    fn test_detach_qmi_pdc_is_noop_but_inhibits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dev = probe(
            props(UpdateMethods::FASTBOOT | UpdateMethods::QMI_PDC),
            MockBackend::new(),
        )
        .unwrap()
        .with_inhibitor(Box::new(RecordingInhibitor(Arc::clone(&log))));
        dev.detach().unwrap();
        dev.attach().unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "inhibit /sys/devices/usb1/1-2".to_string(),
                "uninhibit /sys/devices/usb1/1-2".to_string(),
            ]
        );
    }

    #[test]
    fn test_write_firmware_loads_archive() {
        let backend = MockBackend::new();
        backend.script([
            Step::Indicate(LoadConfigIndication::remaining(0)),
            Step::Indicate(LoadConfigIndication::remaining(0)),
        ]);
        let archive = Archive::new()
            .with_entry("mcfg.A2.018.mbn", vec![0xAA; 700])
            .with_entry("README", b"skip".to_vec())
            .with_entry("mcfg.B7.003.mbn", vec![0xBB; 300]);
        let mut dev = MmDevice::probe(
            props(UpdateMethods::FASTBOOT | UpdateMethods::QMI_PDC),
            backend.clone(),
            no_port(),
            archive_of(archive),
        )
        .unwrap()
        .with_pdc_config(PdcConfig::default().with_indication_timeout(Duration::from_millis(50)));

        let mut phases = Vec::new();
        dev.write_firmware(b"payload", &mut |phase, _, _| phases.push(phase.to_string()))
            .unwrap();
        assert_eq!(phases, vec!["mcfg.A2.018.mbn", "mcfg.B7.003.mbn"]);
        assert_eq!(
            backend.events(),
            vec!["device_new", "open", "allocate", "release", "close"]
        );
    }

    #[test]
    fn test_write_firmware_closes_after_failure() {
        let backend = MockBackend::new();
        backend.script([Step::Reject(crate::protocol::qmi::QmiProtocolError::INTERNAL)]);
        let archive = Archive::new().with_entry("mcfg.A2.018.mbn", vec![0xAA; 10]);
        let mut dev = MmDevice::probe(
            props(UpdateMethods::FASTBOOT | UpdateMethods::QMI_PDC),
            backend.clone(),
            no_port(),
            archive_of(archive),
        )
        .unwrap();
        let err = dev
            .write_firmware(b"payload", &mut |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Batch { .. }));
        assert_eq!(backend.events().last().map(String::as_str), Some("close"));
    }

    #[test]
    fn test_write_firmware_requires_qmi_pdc() {
        let mut dev = probe(props(UpdateMethods::FASTBOOT), MockBackend::new()).unwrap();
        let err = dev
            .write_firmware(b"payload", &mut |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
