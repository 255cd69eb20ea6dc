//! Scripted feature-report transport for engine tests.

use {
    crate::{
        error::{Error, Result},
        port::HidPort,
    },
    std::{
        collections::{HashMap, VecDeque},
        sync::{Arc, Mutex},
    },
};

#[derive(Default)]
pub(crate) struct MockHidState {
    pub(crate) opens: usize,
    pub(crate) closes: usize,
    pub(crate) open: bool,
    pub(crate) sets: Vec<Vec<u8>>,
    pub(crate) gets: usize,
    /// Scripted replies per report id; the last one repeats.
    replies: HashMap<u8, VecDeque<Vec<u8>>>,
    /// Answer bootloader reads by echoing the last request.
    pub(crate) auto_reply: Option<u8>,
}

/// Cloneable handle so tests can inspect traffic after the device took the
/// port.
#[derive(Clone, Default)]
pub(crate) struct MockHid {
    pub(crate) state: Arc<Mutex<MockHidState>>,
}

impl MockHid {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reply to every bootloader read by echoing report id, cmd and echo of
    /// the last SET with return code `rc`.
    pub(crate) fn auto_reply(self, rc: u8) -> Self {
        self.state.lock().unwrap().auto_reply = Some(rc);
        self
    }

    pub(crate) fn push_reply(&self, report_id: u8, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .replies
            .entry(report_id)
            .or_default()
            .push_back(data.to_vec());
    }

    pub(crate) fn sets(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().sets.clone()
    }

    pub(crate) fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

impl HidPort for MockHid {
    fn open(&mut self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if !st.open {
            st.opens += 1;
            st.open = true;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.open {
            st.closes += 1;
            st.open = false;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn set_feature(&mut self, data: &[u8]) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if !st.open {
            return Err(Error::Protocol("mock not open".into()));
        }
        st.sets.push(data.to_vec());
        Ok(())
    }

    fn get_feature(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if !st.open {
            return Err(Error::Protocol("mock not open".into()));
        }
        st.gets += 1;
        let report_id = buf[0];
        let scripted = st.replies.get_mut(&report_id).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        let reply = match (scripted, st.auto_reply) {
            (Some(reply), _) => reply,
            (None, Some(rc)) => {
                let last = st.sets.last().cloned().unwrap_or_default();
                let mut reply = vec![0u8; 6];
                reply[..3].copy_from_slice(&last[..3]);
                reply[3] = rc;
                reply
            },
            (None, None) => return Err(Error::Protocol("no scripted reply".into())),
        };
        let n = buf.len().min(reply.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock-hidraw"
    }
}
