//! In-memory transport that records what the engine asked of it.

use std::sync::{Arc, Mutex};

use tabmux_core::{ClientFrame, MuxError, MuxResult};

use super::{Transport, TransportFactory};
use crate::SubId;

#[derive(Debug, Default)]
pub(crate) struct MockLog {
    pub connects: Vec<(String, SubId, u64)>,
    pub sent: Vec<(String, SubId, ClientFrame)>,
    pub closes: Vec<(String, SubId)>,
    pub fail_sends: bool,
}

impl MockLog {
    pub fn frames_for(&self, tab_id: &str, sub_id: SubId) -> Vec<ClientFrame> {
        self.sent
            .iter()
            .filter(|(t, s, _)| t == tab_id && *s == sub_id)
            .map(|(_, _, f)| f.clone())
            .collect()
    }

    pub fn last_attempt(&self, tab_id: &str, sub_id: SubId) -> Option<u64> {
        self.connects
            .iter()
            .rev()
            .find(|(t, s, _)| t == tab_id && *s == sub_id)
            .map(|(_, _, a)| *a)
    }
}

pub(crate) struct MockTransport {
    tab_id: String,
    sub_id: SubId,
    log: Arc<Mutex<MockLog>>,
}

impl Transport for MockTransport {
    fn connect(&mut self, attempt: u64) {
        let mut log = self.log.lock().unwrap();
        log.connects.push((self.tab_id.clone(), self.sub_id, attempt));
    }

    fn send(&mut self, frame: &ClientFrame) -> MuxResult<()> {
        let mut log = self.log.lock().unwrap();
        if log.fail_sends {
            return Err(MuxError::Transport("mock send failure".into()));
        }
        log.sent.push((self.tab_id.clone(), self.sub_id, frame.clone()));
        Ok(())
    }

    fn close(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.closes.push((self.tab_id.clone(), self.sub_id));
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockFactory {
    pub log: Arc<Mutex<MockLog>>,
}

impl MockFactory {
    pub fn transport(&self, tab_id: &str, sub_id: SubId) -> MockTransport {
        MockTransport {
            tab_id: tab_id.to_string(),
            sub_id,
            log: self.log.clone(),
        }
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, tab_id: &str, sub_id: SubId) -> Box<dyn Transport> {
        Box::new(self.transport(tab_id, sub_id))
    }
}
