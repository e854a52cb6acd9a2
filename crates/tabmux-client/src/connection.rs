//! Per-sub-session connection state machine.
//!
//! `Connecting → Open → Closed → Connecting → …`, ending in `TornDown` once
//! the owning sub-session is destroyed. Transport events, timer expiry and
//! user requests all go through [`ConnectionManager::dispatch`], so tests can
//! drive the machine with synthetic events.

use std::time::Instant;

use tabmux_core::{Backoff, ClientFrame, Geometry, LineBuffer, TaskHandle, TaskQueue, TerminalBuffer};
use tracing::{debug, info, warn};

use crate::recorder::Recorder;
use crate::transport::{Transport, TransportEventKind};
use crate::view::{Surface, ViewSink};
use crate::{SubId, TabId};

/// Connection state of a sub-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// A connect attempt is in flight.
    Connecting,
    /// The remote shell is attached.
    Open,
    /// Lost; a reconnect is scheduled.
    Closed,
    /// The sub-session was destroyed. Terminal state.
    TornDown,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    Opened,
    Data(String),
    Closed(Option<String>),
    ReconnectDue,
    Resize(Geometry),
    Input(String),
    TearDown,
}

impl From<TransportEventKind> for ConnEvent {
    fn from(kind: TransportEventKind) -> Self {
        match kind {
            TransportEventKind::Opened => ConnEvent::Opened,
            TransportEventKind::Data(data) => ConnEvent::Data(data),
            TransportEventKind::Closed(reason) => ConnEvent::Closed(reason),
        }
    }
}

/// Timers owned by the workspace's task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerTask {
    Reconnect { tab_id: TabId, sub_id: SubId },
}

/// Everything a state transition may touch outside the connection itself.
pub struct Hooks<'a> {
    pub now: Instant,
    pub timers: &'a mut TaskQueue<TimerTask>,
    pub recorder: &'a mut Recorder,
    pub view: &'a mut dyn ViewSink,
    pub surface: &'a dyn Surface,
}

/// Owns one sub-session's transport, geometry and terminal buffer.
pub struct ConnectionManager {
    tab_id: TabId,
    sub_id: SubId,
    token: String,
    state: ConnState,
    backoff: Backoff,
    geometry: Geometry,
    pending_resize: Option<Geometry>,
    /// Attempt number of the current transport connection.
    attempt: u64,
    reconnect_timer: Option<TaskHandle>,
    visible: bool,
    transport: Box<dyn Transport>,
    buffer: Box<dyn TerminalBuffer + Send>,
}

impl ConnectionManager {
    pub fn new(
        tab_id: TabId,
        sub_id: SubId,
        token: String,
        geometry: Geometry,
        scrollback: usize,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            tab_id,
            sub_id,
            token,
            state: ConnState::Connecting,
            backoff: Backoff::new(),
            geometry,
            pending_resize: None,
            attempt: 0,
            reconnect_timer: None,
            visible: false,
            transport,
            buffer: Box::new(LineBuffer::new(geometry, scrollback)),
        }
    }

    /// Kick off the first connect attempt.
    pub fn start(&mut self) {
        self.begin_attempt();
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Delay the next reconnect would wait, in milliseconds.
    pub fn backoff_ms(&self) -> u64 {
        self.backoff.current_ms()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn pending_resize(&self) -> Option<Geometry> {
        self.pending_resize
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn buffer(&self) -> &dyn TerminalBuffer {
        self.buffer.as_ref()
    }

    /// Write a local notice into the buffer (and the view, if visible).
    ///
    /// Notices are not remote output and are never recorded.
    pub fn notice(&mut self, text: &str, view: &mut dyn ViewSink) {
        let line = format!("\r\n\x1b[33m[{text}]\x1b[0m\r\n");
        self.buffer.write(&line);
        if self.visible {
            view.output(&self.tab_id, self.sub_id, &line);
        }
    }

    /// Feed a transport event, discarding it if it belongs to an older attempt.
    pub fn on_transport(&mut self, attempt: u64, kind: TransportEventKind, hooks: &mut Hooks<'_>) -> bool {
        if attempt != self.attempt {
            debug!(
                tab_id = %self.tab_id,
                sub_id = self.sub_id,
                attempt,
                current = self.attempt,
                "ignoring event from stale attempt"
            );
            return false;
        }
        self.dispatch(kind.into(), hooks)
    }

    /// Apply one event. Returns whether it had any effect.
    pub fn dispatch(&mut self, event: ConnEvent, hooks: &mut Hooks<'_>) -> bool {
        use ConnState::*;

        match (self.state, event) {
            (TornDown, _) => false,
            (_, ConnEvent::TearDown) => {
                self.tear_down(hooks);
                true
            }
            (Connecting, ConnEvent::Opened) => {
                self.on_open(hooks);
                true
            }
            (_, ConnEvent::Opened) => false,
            (_, ConnEvent::Data(data)) => {
                self.on_data(&data, hooks);
                true
            }
            (Connecting | Open, ConnEvent::Closed(reason)) => {
                self.on_close(reason.as_deref(), hooks);
                true
            }
            (Closed, ConnEvent::Closed(_)) => false,
            (Closed, ConnEvent::ReconnectDue) => {
                self.reconnect_timer = None;
                self.begin_attempt();
                true
            }
            (_, ConnEvent::ReconnectDue) => false,
            (_, ConnEvent::Resize(geometry)) => {
                self.on_resize(geometry, hooks);
                true
            }
            (Open, ConnEvent::Input(data)) => self.send(ClientFrame::Input { data }, hooks),
            (_, ConnEvent::Input(_)) => {
                debug!(tab_id = %self.tab_id, sub_id = self.sub_id, "dropping input while disconnected");
                false
            }
        }
    }

    fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.state = ConnState::Connecting;
        info!(tab_id = %self.tab_id, sub_id = self.sub_id, attempt = self.attempt, "connecting");
        self.transport.connect(self.attempt);
    }

    fn on_open(&mut self, hooks: &mut Hooks<'_>) {
        self.state = ConnState::Open;
        let init = ClientFrame::Init {
            tab_id: self.tab_id.clone(),
            sub_tab_id: self.sub_id,
            token: self.token.clone(),
            cols: self.geometry.cols,
            rows: self.geometry.rows,
        };
        if !self.send(init, hooks) {
            return;
        }
        if let Some(geometry) = self.pending_resize.take() {
            let resize = ClientFrame::Resize {
                cols: geometry.cols,
                rows: geometry.rows,
            };
            if !self.send(resize, hooks) {
                self.pending_resize.get_or_insert(geometry);
                return;
            }
        }
        self.backoff.reset();
        info!(tab_id = %self.tab_id, sub_id = self.sub_id, attempt = self.attempt, "session open");
    }

    fn on_data(&mut self, data: &str, hooks: &mut Hooks<'_>) {
        self.buffer.write(data);
        if self.visible {
            hooks.view.output(&self.tab_id, self.sub_id, data);
        }
        hooks.recorder.on_data(&self.tab_id, data, hooks.now);
    }

    fn on_close(&mut self, reason: Option<&str>, hooks: &mut Hooks<'_>) {
        self.state = ConnState::Closed;
        let delay = self.backoff.next_delay();
        warn!(
            tab_id = %self.tab_id,
            sub_id = self.sub_id,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            reason = reason.unwrap_or("closed"),
            "connection lost, reconnect scheduled"
        );
        self.notice(
            &format!("connection lost, reconnecting in {}s", delay.as_secs()),
            &mut *hooks.view,
        );
        let task = TimerTask::Reconnect {
            tab_id: self.tab_id.clone(),
            sub_id: self.sub_id,
        };
        if let Some(old) = self.reconnect_timer.take() {
            hooks.timers.cancel(old);
        }
        self.reconnect_timer = Some(hooks.timers.schedule(hooks.now + delay, task));
    }

    fn on_resize(&mut self, geometry: Geometry, hooks: &mut Hooks<'_>) {
        self.geometry = geometry;
        self.buffer.resize(geometry);
        if self.state == ConnState::Open {
            let frame = ClientFrame::Resize {
                cols: geometry.cols,
                rows: geometry.rows,
            };
            if self.send(frame, hooks) {
                return;
            }
        }
        self.pending_resize = Some(geometry);
    }

    fn tear_down(&mut self, hooks: &mut Hooks<'_>) {
        if let Some(timer) = self.reconnect_timer.take() {
            hooks.timers.cancel(timer);
        }
        self.transport.close();
        self.state = ConnState::TornDown;
        info!(tab_id = %self.tab_id, sub_id = self.sub_id, "session torn down");
    }

    /// Send on the open connection; a failure counts as a close.
    fn send(&mut self, frame: ClientFrame, hooks: &mut Hooks<'_>) -> bool {
        match self.transport.send(&frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(tab_id = %self.tab_id, sub_id = self.sub_id, "send failed: {e}");
                self.transport.close();
                self.on_close(Some(&e.to_string()), hooks);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockFactory;
    use crate::view::{FixedSurface, NullView};
    use std::time::Duration;

    struct Rig {
        factory: MockFactory,
        timers: TaskQueue<TimerTask>,
        recorder: Recorder,
        view: NullView,
        surface: FixedSurface,
        now: Instant,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                factory: MockFactory::default(),
                timers: TaskQueue::new(),
                recorder: Recorder::new(),
                view: NullView,
                surface: FixedSurface(Geometry::new(80, 24)),
                now: Instant::now(),
            }
        }

        fn conn(&self) -> ConnectionManager {
            let mut conn = ConnectionManager::new(
                "tab".into(),
                1,
                "tok".into(),
                Geometry::new(80, 24),
                100,
                Box::new(self.factory.transport("tab", 1)),
            );
            conn.start();
            conn
        }

        fn send(&mut self, conn: &mut ConnectionManager, event: ConnEvent) -> bool {
            let mut hooks = Hooks {
                now: self.now,
                timers: &mut self.timers,
                recorder: &mut self.recorder,
                view: &mut self.view,
                surface: &self.surface,
            };
            conn.dispatch(event, &mut hooks)
        }

        /// Advance the clock to the next timer and fire it.
        fn fire_next(&mut self, conn: &mut ConnectionManager) -> Duration {
            let at = self.timers.next_deadline().expect("a timer is pending");
            let waited = at - self.now;
            self.now = at;
            for task in self.timers.pop_due(at) {
                let TimerTask::Reconnect { .. } = task;
                self.send(conn, ConnEvent::ReconnectDue);
            }
            waited
        }

        fn frames(&self) -> Vec<ClientFrame> {
            self.factory.log.lock().unwrap().frames_for("tab", 1)
        }
    }

    #[test]
    fn open_sends_init_with_geometry() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        assert_eq!(conn.state(), ConnState::Connecting);
        assert!(rig.send(&mut conn, ConnEvent::Opened));
        assert_eq!(conn.state(), ConnState::Open);
        assert_eq!(
            rig.frames(),
            vec![ClientFrame::Init {
                tab_id: "tab".into(),
                sub_tab_id: 1,
                token: "tok".into(),
                cols: 80,
                rows: 24,
            }]
        );
    }

    #[test]
    fn backoff_doubles_to_ceiling_and_resets_on_open() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        let mut waits = Vec::new();
        for _ in 0..6 {
            rig.send(&mut conn, ConnEvent::Closed(None));
            assert_eq!(conn.state(), ConnState::Closed);
            waits.push(rig.fire_next(&mut conn).as_millis() as u64);
            assert_eq!(conn.state(), ConnState::Connecting);
        }
        assert_eq!(waits, vec![2000, 4000, 8000, 16000, 30000, 30000]);

        rig.send(&mut conn, ConnEvent::Opened);
        assert_eq!(conn.backoff_ms(), 2000);
        rig.send(&mut conn, ConnEvent::Closed(None));
        assert_eq!(rig.fire_next(&mut conn).as_millis(), 2000);
    }

    #[test]
    fn each_reconnect_is_a_new_attempt() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        assert_eq!(conn.attempt(), 1);
        rig.send(&mut conn, ConnEvent::Closed(Some("refused".into())));
        rig.fire_next(&mut conn);
        assert_eq!(conn.attempt(), 2);
        let log = rig.factory.log.lock().unwrap();
        assert_eq!(log.last_attempt("tab", 1), Some(2));
        assert_eq!(log.connects.len(), 2);
    }

    #[test]
    fn stale_attempt_events_are_ignored() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        rig.send(&mut conn, ConnEvent::Closed(None));
        rig.fire_next(&mut conn);
        let mut hooks = Hooks {
            now: rig.now,
            timers: &mut rig.timers,
            recorder: &mut rig.recorder,
            view: &mut rig.view,
            surface: &rig.surface,
        };
        assert!(!conn.on_transport(1, TransportEventKind::Closed(None), &mut hooks));
        assert_eq!(conn.state(), ConnState::Connecting);
        assert!(conn.on_transport(2, TransportEventKind::Opened, &mut hooks));
        assert_eq!(conn.state(), ConnState::Open);
    }

    #[test]
    fn resize_while_disconnected_is_queued_last_write_wins() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        rig.send(&mut conn, ConnEvent::Resize(Geometry::new(100, 30)));
        rig.send(&mut conn, ConnEvent::Resize(Geometry::new(120, 40)));
        assert_eq!(conn.pending_resize(), Some(Geometry::new(120, 40)));
        assert!(rig.frames().is_empty());

        rig.send(&mut conn, ConnEvent::Opened);
        let frames = rig.frames();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], ClientFrame::Init { cols: 120, rows: 40, .. }));
        assert_eq!(frames[1], ClientFrame::Resize { cols: 120, rows: 40 });
        assert_eq!(conn.pending_resize(), None);
    }

    #[test]
    fn resize_while_open_is_sent_immediately() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        rig.send(&mut conn, ConnEvent::Opened);
        rig.send(&mut conn, ConnEvent::Resize(Geometry::new(90, 20)));
        assert_eq!(rig.frames().last(), Some(&ClientFrame::Resize { cols: 90, rows: 20 }));
        assert_eq!(conn.pending_resize(), None);
        assert_eq!(conn.buffer().geometry(), Geometry::new(90, 20));
    }

    #[test]
    fn data_goes_to_buffer_and_recorder_even_when_hidden() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        rig.recorder.start_tab("tab", Geometry::new(80, 24), rig.now);
        rig.send(&mut conn, ConnEvent::Opened);
        assert!(!conn.is_visible());
        rig.send(&mut conn, ConnEvent::Data("hi\r\n".into()));
        assert_eq!(conn.buffer().line(0).as_deref(), Some("hi"));
        let session = rig.recorder.stop_tab("tab").unwrap();
        assert_eq!(session.events()[0].data, "hi\r\n");
    }

    #[test]
    fn close_writes_notice_but_does_not_record_it() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        rig.recorder.start_tab("tab", Geometry::new(80, 24), rig.now);
        rig.send(&mut conn, ConnEvent::Opened);
        rig.send(&mut conn, ConnEvent::Closed(None));
        let text: Vec<String> = (0..conn.buffer().length())
            .filter_map(|i| conn.buffer().line(i))
            .collect();
        assert!(text.iter().any(|l| l.contains("reconnecting in 2s")));
        assert!(rig.recorder.stop_tab("tab").is_none());
    }

    #[test]
    fn tear_down_cancels_reconnect_and_is_terminal() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        rig.send(&mut conn, ConnEvent::Closed(None));
        assert_eq!(rig.timers.len(), 1);
        assert!(rig.send(&mut conn, ConnEvent::TearDown));
        assert_eq!(conn.state(), ConnState::TornDown);
        assert!(rig.timers.is_empty());
        assert_eq!(rig.factory.log.lock().unwrap().closes.len(), 1);

        assert!(!rig.send(&mut conn, ConnEvent::ReconnectDue));
        assert!(!rig.send(&mut conn, ConnEvent::Opened));
        assert!(!rig.send(&mut conn, ConnEvent::Data("x".into())));
        assert_eq!(conn.state(), ConnState::TornDown);
        assert_eq!(rig.factory.log.lock().unwrap().connects.len(), 1);
    }

    #[test]
    fn send_failure_schedules_reconnect_and_keeps_resize() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        rig.send(&mut conn, ConnEvent::Opened);
        rig.factory.log.lock().unwrap().fail_sends = true;
        rig.send(&mut conn, ConnEvent::Resize(Geometry::new(70, 20)));
        assert_eq!(conn.state(), ConnState::Closed);
        assert_eq!(conn.pending_resize(), Some(Geometry::new(70, 20)));
        assert_eq!(rig.timers.len(), 1);
    }

    #[test]
    fn input_only_sent_when_open() {
        let mut rig = Rig::new();
        let mut conn = rig.conn();
        assert!(!rig.send(&mut conn, ConnEvent::Input("ls\r".into())));
        rig.send(&mut conn, ConnEvent::Opened);
        assert!(rig.send(&mut conn, ConnEvent::Input("ls\r".into())));
        assert_eq!(rig.frames().last(), Some(&ClientFrame::Input { data: "ls\r".into() }));
    }
}
