//! The event loop that owns a [`Workspace`].
//!
//! Transport events, user commands and timer deadlines all funnel into one
//! `select!` loop, so every state change happens on a single task, one
//! event at a time. Queued transport events go first, but after
//! [`EVENT_BURST`] of them in a row the loop checks timers and commands.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::capture::Capture;
use crate::multiplexer::SubSessionInfo;
use crate::transport::EventReceiver;
use crate::workspace::{RecordingToggle, Workspace};
use crate::{SubId, TabId};

const COMMAND_QUEUE: usize = 256;

/// Transport events handled back to back before timers and commands get a turn.
const EVENT_BURST: usize = 64;

/// A user action for the event loop.
#[derive(Debug)]
pub enum Command {
    CreateTab(TabId),
    ActivateTab(TabId),
    CloseTab(TabId),
    NewShell(TabId),
    RemoveShell(TabId, SubId),
    Switch(TabId, SubId),
    /// Step the active sub-session forward (`true`) or back.
    Cycle(TabId, bool),
    Input(TabId, String),
    /// The render surface changed; refit the visible sub-session.
    Resize,
    ToggleRecording(TabId, oneshot::Sender<Option<RecordingToggle>>),
    SetAutoRecord(bool),
    Mark(TabId),
    Capture(TabId, oneshot::Sender<Option<Capture>>),
    SubSessions(TabId, oneshot::Sender<Vec<SubSessionInfo>>),
    Shutdown,
}

/// Sends commands to a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<Command>,
}

impl RuntimeHandle {
    /// Queue a command. False once the loop has exited.
    pub async fn send(&self, command: Command) -> bool {
        self.tx.send(command).await.is_ok()
    }

    pub async fn input(&self, tab_id: &str, data: &str) -> bool {
        self.send(Command::Input(tab_id.to_string(), data.to_string()))
            .await
    }

    pub async fn toggle_recording(&self, tab_id: &str) -> Option<RecordingToggle> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::ToggleRecording(tab_id.to_string(), tx)).await {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn capture(&self, tab_id: &str) -> Option<Capture> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Capture(tab_id.to_string(), tx)).await {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn sub_sessions(&self, tab_id: &str) -> Vec<SubSessionInfo> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::SubSessions(tab_id.to_string(), tx)).await {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) {
        self.send(Command::Shutdown).await;
    }
}

pub struct Runtime {
    workspace: Workspace,
    events: EventReceiver,
    commands: mpsc::Receiver<Command>,
    handle: RuntimeHandle,
}

impl Runtime {
    pub fn new(workspace: Workspace, events: EventReceiver) -> Self {
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE);
        Self {
            workspace,
            events,
            commands,
            handle: RuntimeHandle { tx },
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Run until [`Command::Shutdown`] or every handle is dropped, then close
    /// all tabs and hand the workspace back.
    pub async fn run(self) -> Workspace {
        let Runtime {
            mut workspace,
            mut events,
            mut commands,
            handle,
        } = self;
        drop(handle);
        info!("runtime started");

        let mut burst = 0usize;
        loop {
            let deadline = workspace.next_deadline();
            let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(
                deadline.unwrap_or_else(Instant::now),
            ));

            tokio::select! {
                biased;

                Some(event) = events.recv(), if burst < EVENT_BURST => {
                    burst += 1;
                    workspace.handle_transport(event, Instant::now());
                }
                _ = sleep, if deadline.is_some() => {
                    burst = 0;
                    let fired = workspace.fire_timers(Instant::now());
                    debug!(fired, "timers fired");
                }
                command = commands.recv() => {
                    burst = 0;
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => apply(&mut workspace, command),
                    }
                }
                _ = std::future::ready(()), if burst >= EVENT_BURST => {
                    burst = 0;
                }
            }
        }

        workspace.shutdown(Instant::now());
        info!("runtime stopped");
        workspace
    }
}

fn apply(ws: &mut Workspace, command: Command) {
    let now = Instant::now();
    match command {
        Command::CreateTab(tab) => {
            ws.create_tab(&tab, now);
        }
        Command::ActivateTab(tab) => {
            ws.activate_tab(&tab, now);
        }
        Command::CloseTab(tab) => {
            ws.close_tab(&tab, now);
        }
        Command::NewShell(tab) => {
            ws.create_sub_session(&tab, now);
        }
        Command::RemoveShell(tab, id) => {
            ws.remove_sub_session(&tab, id, now);
        }
        Command::Switch(tab, id) => {
            ws.switch_active(&tab, id, now);
        }
        Command::Cycle(tab, forward) => {
            ws.cycle_active(&tab, forward, now);
        }
        Command::Input(tab, data) => {
            ws.send_input(&tab, &data, now);
        }
        Command::Resize => {
            ws.resize(now);
        }
        Command::ToggleRecording(tab, reply) => {
            let _ = reply.send(ws.toggle_recording(&tab, now));
        }
        Command::SetAutoRecord(enabled) => ws.set_auto_record(enabled),
        Command::Mark(tab) => {
            ws.mark_command_start(&tab);
        }
        Command::Capture(tab, reply) => {
            let _ = reply.send(ws.capture_since_mark(&tab));
        }
        Command::SubSessions(tab, reply) => {
            let _ = reply.send(ws.sub_sessions(&tab));
        }
        Command::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryRecordingStore;
    use crate::transport::mock::MockFactory;
    use crate::transport::{event_channel, TransportEvent, TransportEventKind};
    use crate::view::{FixedSurface, NullView};
    use crate::workspace::WorkspaceConfig;
    use crate::ConnState;
    use tabmux_core::{ClientFrame, Geometry};

    fn workspace(factory: &MockFactory) -> Workspace {
        Workspace::new(
            WorkspaceConfig {
                token: "tok".into(),
                ..Default::default()
            },
            Box::new(factory.clone()),
            Box::new(MemoryRecordingStore::default()),
            Box::new(NullView),
            Box::new(FixedSurface(Geometry::new(80, 24))),
        )
    }

    fn event(sub_id: SubId, kind: TransportEventKind) -> TransportEvent {
        TransportEvent {
            tab_id: "t".into(),
            sub_id,
            attempt: 1,
            kind,
        }
    }

    #[tokio::test]
    async fn commands_and_events_drive_the_workspace() {
        let factory = MockFactory::default();
        let (events_tx, events_rx) = event_channel();
        let runtime = Runtime::new(workspace(&factory), events_rx);
        let handle = runtime.handle();
        let task = tokio::spawn(runtime.run());

        handle.send(Command::CreateTab("t".into())).await;
        handle.send(Command::ActivateTab("t".into())).await;
        let subs = handle.sub_sessions("t").await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].state, ConnState::Connecting);

        events_tx.send(event(1, TransportEventKind::Opened)).unwrap();
        assert_eq!(handle.sub_sessions("t").await[0].state, ConnState::Open);

        handle.send(Command::Mark("t".into())).await;
        handle.input("t", "pwd\r").await;
        handle.sub_sessions("t").await;
        events_tx
            .send(event(1, TransportEventKind::Data("pwd\r\n/home\r\n$ ".into())))
            .unwrap();
        let capture = handle.capture("t").await.unwrap();
        assert_eq!(capture.text(), Some("/home"));

        handle.shutdown().await;
        let ws = task.await.unwrap();
        assert!(ws.tabs().is_empty());

        let frames = factory.log.lock().unwrap().frames_for("t", 1);
        assert!(matches!(frames[0], ClientFrame::Init { .. }));
        assert!(frames.contains(&ClientFrame::Input {
            data: "pwd\r".into()
        }));
    }

    #[tokio::test]
    async fn toggle_recording_round_trips() {
        let factory = MockFactory::default();
        let (events_tx, events_rx) = event_channel();
        let runtime = Runtime::new(workspace(&factory), events_rx);
        let handle = runtime.handle();
        let task = tokio::spawn(runtime.run());

        handle.send(Command::CreateTab("t".into())).await;
        assert_eq!(handle.toggle_recording("t").await, Some(RecordingToggle::Started));
        events_tx.send(event(1, TransportEventKind::Data("x".into()))).unwrap();
        assert!(matches!(
            handle.toggle_recording("t").await,
            Some(RecordingToggle::Stopped(crate::StopOutcome::Saved { .. }))
        ));
        assert_eq!(handle.toggle_recording("missing").await, None);

        drop(handle);
        let ws = task.await.unwrap();
        assert!(ws.tabs().is_empty());
    }

    #[tokio::test]
    async fn event_flood_does_not_starve_commands() {
        let factory = MockFactory::default();
        let (events_tx, events_rx) = event_channel();
        let runtime = Runtime::new(workspace(&factory), events_rx);
        let handle = runtime.handle();
        let task = tokio::spawn(runtime.run());
        handle.send(Command::CreateTab("t".into())).await;
        handle.sub_sessions("t").await;

        let producer = tokio::spawn(async move {
            loop {
                for _ in 0..200 {
                    if events_tx.send(event(1, TransportEventKind::Data("x".into()))).is_err() {
                        return;
                    }
                }
                tokio::task::yield_now().await;
            }
        });

        let subs = tokio::time::timeout(std::time::Duration::from_secs(5), handle.sub_sessions("t"))
            .await
            .expect("command starved behind transport events");
        assert_eq!(subs.len(), 1);

        producer.abort();
        handle.shutdown().await;
        let ws = task.await.unwrap();
        assert!(ws.tabs().is_empty());
    }
}
