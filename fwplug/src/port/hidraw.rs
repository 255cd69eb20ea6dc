//! Linux hidraw feature-report transport.

use {
    crate::{error::Result, port::HidPort},
    log::{debug, trace},
    std::{
        fs::{File, OpenOptions},
        io,
        os::fd::{AsRawFd, RawFd},
        path::{Path, PathBuf},
    },
};

#[allow(unsafe_code)]
mod ioctl {
    use nix::ioctl_readwrite_buf;

    // HIDIOCSFEATURE(len) and HIDIOCGFEATURE(len) from <linux/hidraw.h>
    ioctl_readwrite_buf!(hidiocsfeature, b'H', 0x06, u8);
    ioctl_readwrite_buf!(hidiocgfeature, b'H', 0x07, u8);
}

/// A `/dev/hidrawN` node.
pub struct HidrawPort {
    path: PathBuf,
    name: String,
    file: Option<File>,
}

impl HidrawPort {
    /// Create a port for `path`; the node is opened by [`HidPort::open`].
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path
            .as_ref()
            .to_path_buf();
        let name = path
            .display()
            .to_string();
        Self {
            path,
            name,
            file: None,
        }
    }

    fn fd(&self) -> Result<RawFd> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "hidraw node closed"))?;
        Ok(file.as_raw_fd())
    }
}

impl HidPort for HidrawPort {
    fn open(&mut self) -> Result<()> {
        if self
            .file
            .is_some()
        {
            return Ok(());
        }
        debug!("opening {}", self.name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self
            .file
            .take()
            .is_some()
        {
            debug!("closed {}", self.name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file
            .is_some()
    }

    fn set_feature(&mut self, data: &[u8]) -> Result<()> {
        trace!("SetFeature: {data:02x?}");
        let fd = self.fd()?;
        let mut buf = data.to_vec();
        // SAFETY: the request length is taken from `buf`, which outlives the call.
        #[allow(unsafe_code)]
        unsafe { ioctl::hidiocsfeature(fd, &mut buf) }.map_err(io::Error::from)?;
        Ok(())
    }

    fn get_feature(&mut self, buf: &mut [u8]) -> Result<()> {
        let fd = self.fd()?;
        // SAFETY: the request length is taken from `buf`, which outlives the call.
        #[allow(unsafe_code)]
        unsafe { ioctl::hidiocgfeature(fd, buf) }.map_err(io::Error::from)?;
        trace!("GetFeature: {buf:02x?}");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
