//! WebSocket transport.
//!
//! Each connection attempt runs in its own task. Outgoing control frames are
//! JSON text messages; incoming binary or text messages are raw shell output.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use tabmux_core::{ClientFrame, MuxError, MuxResult};

use super::{EventSender, Transport, TransportEvent, TransportEventKind, TransportFactory, Utf8Carry};
use crate::SubId;

/// Builds [`WsTransport`]s that all dial the same endpoint.
pub struct WsTransportFactory {
    url: String,
    events: EventSender,
}

impl WsTransportFactory {
    pub fn new(url: impl Into<String>, events: EventSender) -> Self {
        Self {
            url: url.into(),
            events,
        }
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(&self, tab_id: &str, sub_id: SubId) -> Box<dyn Transport> {
        Box::new(WsTransport::new(
            self.url.clone(),
            tab_id.to_string(),
            sub_id,
            self.events.clone(),
        ))
    }
}

/// WebSocket connection to one remote shell.
pub struct WsTransport {
    url: String,
    tab_id: String,
    sub_id: SubId,
    events: EventSender,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(url: String, tab_id: String, sub_id: SubId, events: EventSender) -> Self {
        Self {
            url,
            tab_id,
            sub_id,
            events,
            outgoing: None,
            task: None,
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, attempt: u64) {
        self.close();
        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);

        let conn = Connection {
            tab_id: self.tab_id.clone(),
            sub_id: self.sub_id,
            attempt,
            events: self.events.clone(),
        };
        let url = self.url.clone();
        self.task = Some(tokio::spawn(async move {
            conn.run(&url, rx).await;
        }));
    }

    fn send(&mut self, frame: &ClientFrame) -> MuxResult<()> {
        let text = frame.encode()?;
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| MuxError::Transport("not connected".into()))?;
        outgoing
            .send(Message::Text(text))
            .map_err(|_| MuxError::Transport("connection task has ended".into()))
    }

    fn close(&mut self) {
        self.outgoing = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// State owned by one connection attempt's task.
struct Connection {
    tab_id: String,
    sub_id: SubId,
    attempt: u64,
    events: EventSender,
}

impl Connection {
    fn emit(&self, kind: TransportEventKind) {
        let _ = self.events.send(TransportEvent {
            tab_id: self.tab_id.clone(),
            sub_id: self.sub_id,
            attempt: self.attempt,
            kind,
        });
    }

    async fn run(self, url: &str, mut outgoing: mpsc::UnboundedReceiver<Message>) {
        let ws = match connect_async(url).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::debug!(tab_id = %self.tab_id, sub_id = self.sub_id, "connect failed: {e}");
                self.emit(TransportEventKind::Closed(Some(e.to_string())));
                return;
            }
        };
        tracing::info!(tab_id = %self.tab_id, sub_id = self.sub_id, attempt = self.attempt, "WebSocket connected to {}", url);
        self.emit(TransportEventKind::Opened);

        let (mut sink, mut stream) = ws.split();
        let mut carry = Utf8Carry::default();

        loop {
            tokio::select! {
                msg = outgoing.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            self.emit(TransportEventKind::Closed(Some(format!("send failed: {e}"))));
                            return;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Binary(bytes))) => {
                        let text = carry.decode(&bytes);
                        if !text.is_empty() {
                            self.emit(TransportEventKind::Data(text));
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        self.emit(TransportEventKind::Data(text));
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(tab_id = %self.tab_id, sub_id = self.sub_id, "WebSocket closed by peer");
                        self.emit(TransportEventKind::Closed(None));
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(tab_id = %self.tab_id, sub_id = self.sub_id, "WebSocket read error: {e}");
                        self.emit(TransportEventKind::Closed(Some(e.to_string())));
                        return;
                    }
                },
            }
        }
    }
}
