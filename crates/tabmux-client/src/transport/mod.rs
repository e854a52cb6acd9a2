//! Per-sub-session transport abstraction.
//!
//! A transport is bound to one remote shell. It is driven without blocking:
//! `connect` starts an attempt and returns immediately, and everything the
//! remote side does (open, output, close) comes back later as a
//! [`TransportEvent`] on the workspace's event channel, tagged with the
//! attempt number that produced it.

pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use websocket::{WsTransport, WsTransportFactory};

use tabmux_core::{ClientFrame, MuxResult};
use tokio::sync::mpsc;

use crate::SubId;

/// What happened on a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Opened,
    Data(String),
    /// Connect failure or remote close, with a reason if one is known.
    Closed(Option<String>),
}

/// An inbound transport event, addressed to one sub-session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub tab_id: String,
    pub sub_id: SubId,
    /// Attempt that produced this event; stale attempts are ignored.
    pub attempt: u64,
    pub kind: TransportEventKind,
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the channel transports report on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A reconnectable duplex connection to one remote shell.
pub trait Transport: Send {
    /// Begin connection attempt `attempt`, abandoning any previous one.
    fn connect(&mut self, attempt: u64);

    /// Queue a control frame on the current connection.
    fn send(&mut self, frame: &ClientFrame) -> MuxResult<()>;

    /// Drop the current connection; no further events are produced for it.
    fn close(&mut self);
}

/// Builds a transport for a newly created sub-session.
pub trait TransportFactory: Send {
    fn create(&self, tab_id: &str, sub_id: SubId) -> Box<dyn Transport>;
}

/// Incremental UTF-8 decoding across transport payload boundaries.
///
/// A multi-byte character split between two payloads is held back until the
/// rest arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carry_joins_split_character() {
        let mut carry = Utf8Carry::default();
        let bytes = "héllo".as_bytes();
        assert_eq!(carry.decode(&bytes[..2]), "h");
        assert_eq!(carry.decode(&bytes[2..]), "éllo");
    }

    #[test]
    fn carry_replaces_invalid_bytes() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.decode(b"a\xffb"), "a\u{fffd}b");
    }
}
