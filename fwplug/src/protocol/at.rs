//! AT command exchange over a serial [`Port`].
//!
//! Used to push a modem into fastboot mode before flashing.

use {
    crate::{
        error::{Error, Result},
        port::Port,
    },
    log::{debug, trace},
    std::{
        io::{ErrorKind, Read},
        time::{Duration, Instant},
    },
};

/// Default timeout of a single AT command.
pub const AT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Expected reply prefix.
pub const AT_OK: &[u8] = b"\r\nOK\r\n";

/// Send `cmd` and require an `OK` reply within `timeout`.
pub fn send_command<P: Port + ?Sized>(port: &mut P, cmd: &str, timeout: Duration) -> Result<()> {
    debug!("sending AT command: {cmd}");
    port.set_timeout(timeout)?;
    port.clear_buffers()?;

    let mut frame = Vec::with_capacity(cmd.len() + 2);
    frame.extend_from_slice(cmd.as_bytes());
    frame.extend_from_slice(b"\r\n");
    port.write_all_bytes(&frame)?;

    let reply = read_reply(port, timeout)?;
    trace!("AT reply: {reply:02x?}");
    check_reply(cmd, &reply)
}

fn read_reply<P: Port + ?Sized>(port: &mut P, timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut reply = Vec::new();
    let mut buf = [0u8; 64];

    while reply.len() < AT_OK.len() && Instant::now() < deadline {
        match port.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => reply.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(reply)
}

/// Validate an AT reply.
pub fn check_reply(cmd: &str, reply: &[u8]) -> Result<()> {
    if reply.is_empty() {
        return Err(Error::Timeout(format!("no reply to {cmd}")));
    }
    if reply.len() < AT_OK.len() {
        return Err(Error::Protocol(format!(
            "reply to {cmd} too short: {} bytes",
            reply.len()
        )));
    }
    if !reply.starts_with(AT_OK) {
        return Err(Error::Protocol(format!(
            "{cmd} failed: {}",
            String::from_utf8_lossy(reply).trim()
        )));
    }
    Ok(())
}
