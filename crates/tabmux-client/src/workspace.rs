//! The application-owned store tying every engine together.
//!
//! A [`Workspace`] owns the multiplexer, the recorder, the shared timer
//! queue, the recordings store and the user settings. Every operation takes
//! the current time explicitly and runs to completion; nothing here blocks or
//! spawns.

use std::collections::HashSet;
use std::time::Instant;

use tabmux_core::{MuxResult, TaskQueue};
use tracing::{info, warn};

use crate::capture::{capture_output_from_mark, mark_command_start, Capture, Mark};
use crate::connection::{Hooks, TimerTask};
use crate::multiplexer::{SessionMultiplexer, SubSessionInfo};
use crate::playback::PlaybackEngine;
use crate::recorder::{Recorder, RecordingSession};
use crate::storage::{RecordingInfo, RecordingStore};
use crate::transport::{TransportEvent, TransportFactory};
use crate::view::{Surface, ViewSink};
use crate::{SubId, TabId};

/// Runtime-toggleable user preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub auto_record: bool,
}

#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Auth token sent in every init frame.
    pub token: String,
    /// Scrollback lines kept per sub-session.
    pub scrollback: usize,
    pub auto_record: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            scrollback: tabmux_core::buffer::DEFAULT_SCROLLBACK,
            auto_record: false,
        }
    }
}

/// What stopping a recording produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRecording,
    /// Stopped with zero events; nothing to save.
    Empty,
    Saved { name: String },
    /// Saving failed; the recording is held until retried or discarded.
    Unsaved { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingToggle {
    Started,
    Stopped(StopOutcome),
}

/// A finished recording the store refused.
#[derive(Debug, Clone)]
pub struct UnsavedRecording {
    pub name: String,
    pub session: RecordingSession,
    pub reason: String,
}

pub struct Workspace {
    mux: SessionMultiplexer,
    recorder: Recorder,
    timers: TaskQueue<TimerTask>,
    settings: Settings,
    store: Box<dyn RecordingStore>,
    view: Box<dyn ViewSink>,
    surface: Box<dyn Surface>,
    unsaved: Vec<UnsavedRecording>,
}

impl Workspace {
    pub fn new(
        config: WorkspaceConfig,
        factory: Box<dyn TransportFactory>,
        store: Box<dyn RecordingStore>,
        view: Box<dyn ViewSink>,
        surface: Box<dyn Surface>,
    ) -> Self {
        Self {
            mux: SessionMultiplexer::new(factory, config.token, config.scrollback),
            recorder: Recorder::new(),
            timers: TaskQueue::new(),
            settings: Settings {
                auto_record: config.auto_record,
            },
            store,
            view,
            surface,
            unsaved: Vec::new(),
        }
    }

    /// Split borrow: the multiplexer plus hooks over everything else.
    fn parts(&mut self, now: Instant) -> (&mut SessionMultiplexer, Hooks<'_>) {
        (
            &mut self.mux,
            Hooks {
                now,
                timers: &mut self.timers,
                recorder: &mut self.recorder,
                view: self.view.as_mut(),
                surface: self.surface.as_ref(),
            },
        )
    }

    pub fn mux(&self) -> &SessionMultiplexer {
        &self.mux
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tabs(&self) -> Vec<TabId> {
        self.mux.tab_ids()
    }

    pub fn sub_sessions(&self, tab_id: &str) -> Vec<SubSessionInfo> {
        self.mux.sub_sessions(tab_id)
    }

    pub fn visible_tab(&self) -> Option<&str> {
        self.mux.visible_tab()
    }

    pub fn is_recording(&self, tab_id: &str) -> bool {
        self.recorder.is_recording(tab_id)
    }

    pub fn set_auto_record(&mut self, enabled: bool) {
        info!(enabled, "auto-record preference changed");
        self.settings.auto_record = enabled;
    }

    pub fn auto_record(&self) -> bool {
        self.settings.auto_record
    }

    // ── Tabs and sub-sessions ────────────────────────────────────────

    pub fn create_tab(&mut self, tab_id: &str, now: Instant) -> bool {
        let (mux, mut hooks) = self.parts(now);
        if !mux.create_tab(tab_id, &mut hooks) {
            return false;
        }
        self.auto_start(tab_id, now);
        true
    }

    pub fn activate_tab(&mut self, tab_id: &str, now: Instant) -> bool {
        let (mux, mut hooks) = self.parts(now);
        if !mux.activate_tab(tab_id, &mut hooks) {
            return false;
        }
        self.auto_start(tab_id, now);
        true
    }

    /// Tear a tab down, saving its recording first.
    pub fn close_tab(&mut self, tab_id: &str, now: Instant) -> Option<StopOutcome> {
        self.mux.tab(tab_id)?;
        let outcome = self.stop_recording(tab_id);
        let (mux, mut hooks) = self.parts(now);
        mux.close_tab(tab_id, &mut hooks);
        self.recorder.forget_tab(tab_id);
        Some(outcome)
    }

    pub fn create_sub_session(&mut self, tab_id: &str, now: Instant) -> Option<SubId> {
        let (mux, mut hooks) = self.parts(now);
        mux.create_sub_session(tab_id, &mut hooks)
    }

    pub fn remove_sub_session(&mut self, tab_id: &str, id: SubId, now: Instant) -> bool {
        let (mux, mut hooks) = self.parts(now);
        mux.remove_sub_session(tab_id, id, &mut hooks)
    }

    pub fn switch_active(&mut self, tab_id: &str, id: SubId, now: Instant) -> bool {
        let (mux, mut hooks) = self.parts(now);
        mux.switch_active(tab_id, id, &mut hooks)
    }

    /// Step the active sub-session forward or back, wrapping around.
    pub fn cycle_active(&mut self, tab_id: &str, forward: bool, now: Instant) -> bool {
        let Some(tab) = self.mux.tab(tab_id) else {
            return false;
        };
        let ids = tab.sub_ids();
        let Some(pos) = ids.iter().position(|&id| id == tab.active_id()) else {
            return false;
        };
        let next = if forward {
            ids[(pos + 1) % ids.len()]
        } else {
            ids[(pos + ids.len() - 1) % ids.len()]
        };
        self.switch_active(tab_id, next, now)
    }

    pub fn send_input(&mut self, tab_id: &str, data: &str, now: Instant) -> bool {
        let (mux, mut hooks) = self.parts(now);
        mux.send_input(tab_id, data, &mut hooks)
    }

    /// The render surface changed size.
    pub fn resize(&mut self, now: Instant) -> bool {
        let (mux, mut hooks) = self.parts(now);
        mux.reflow_visible(&mut hooks)
    }

    // ── Event loop entry points ──────────────────────────────────────

    pub fn handle_transport(&mut self, event: TransportEvent, now: Instant) -> bool {
        let (mux, mut hooks) = self.parts(now);
        mux.on_transport(event, &mut hooks)
    }

    /// Run every timer due by `now`. Returns how many ran.
    pub fn fire_timers(&mut self, now: Instant) -> usize {
        let due = self.timers.pop_due(now);
        let count = due.len();
        for task in due {
            let (mux, mut hooks) = self.parts(now);
            mux.on_timer(task, &mut hooks);
        }
        count
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Close every tab, saving recordings.
    pub fn shutdown(&mut self, now: Instant) {
        for tab_id in self.mux.tab_ids() {
            self.close_tab(&tab_id, now);
        }
        self.timers.clear();
    }

    // ── Recording ────────────────────────────────────────────────────

    fn auto_start(&mut self, tab_id: &str, now: Instant) {
        if let Some(geometry) = self.mux.active_geometry(tab_id) {
            self.recorder
                .auto_start(tab_id, self.settings.auto_record, geometry, now);
        }
    }

    /// Start recording with the active sub-session's geometry.
    pub fn start_recording(&mut self, tab_id: &str, now: Instant) -> bool {
        match self.mux.active_geometry(tab_id) {
            Some(geometry) => self.recorder.start_tab(tab_id, geometry, now),
            None => false,
        }
    }

    /// Stop recording and save under a timestamped name, suffixed `-2`, `-3`
    /// and so on if the tab already has a recording by that name.
    pub fn stop_recording(&mut self, tab_id: &str) -> StopOutcome {
        if !self.recorder.is_recording(tab_id) {
            return StopOutcome::NotRecording;
        }
        let Some(session) = self.recorder.stop_tab(tab_id) else {
            return StopOutcome::Empty;
        };
        let name = self.free_name(tab_id, &session.default_name());
        match self.save(&session, &name) {
            Ok(()) => {
                info!(tab_id, name = %name, "recording saved");
                StopOutcome::Saved { name }
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(tab_id, name = %name, error = %reason, "failed to save recording");
                self.notify(tab_id, &format!("recording not saved: {reason}"));
                self.unsaved.push(UnsavedRecording {
                    name: name.clone(),
                    session,
                    reason: reason.clone(),
                });
                StopOutcome::Unsaved { name, reason }
            }
        }
    }

    pub fn toggle_recording(&mut self, tab_id: &str, now: Instant) -> Option<RecordingToggle> {
        if self.recorder.is_recording(tab_id) {
            Some(RecordingToggle::Stopped(self.stop_recording(tab_id)))
        } else if self.start_recording(tab_id, now) {
            Some(RecordingToggle::Started)
        } else {
            None
        }
    }

    fn free_name(&self, tab_id: &str, base: &str) -> String {
        let mut taken: HashSet<String> = self
            .store
            .list(tab_id)
            .map(|list| list.into_iter().map(|r| r.name).collect())
            .unwrap_or_default();
        taken.extend(
            self.unsaved
                .iter()
                .filter(|held| held.session.tab_id() == tab_id)
                .map(|held| held.name.clone()),
        );
        if !taken.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    fn save(&mut self, session: &RecordingSession, name: &str) -> MuxResult<()> {
        let cast = session.serialize()?;
        self.store.save(session.tab_id(), name, &cast)
    }

    /// Write a transient notice into the tab's active sub-session.
    fn notify(&mut self, tab_id: &str, text: &str) {
        if let Some(sub) = self.mux.tab_mut(tab_id).and_then(|t| t.active_mut()) {
            sub.conn.notice(text, self.view.as_mut());
        }
    }

    pub fn unsaved(&self) -> &[UnsavedRecording] {
        &self.unsaved
    }

    /// Try saving held recordings again. Returns how many were saved.
    pub fn retry_save(&mut self) -> usize {
        let pending = std::mem::take(&mut self.unsaved);
        let mut saved = 0;
        for mut held in pending {
            match self.save(&held.session, &held.name) {
                Ok(()) => {
                    info!(tab_id = held.session.tab_id(), name = %held.name, "held recording saved");
                    saved += 1;
                }
                Err(e) => {
                    held.reason = e.to_string();
                    self.unsaved.push(held);
                }
            }
        }
        saved
    }

    /// Drop every held recording. Returns how many were dropped.
    pub fn discard_unsaved(&mut self) -> usize {
        let count = self.unsaved.len();
        if count > 0 {
            warn!(count, "discarding unsaved recordings");
        }
        self.unsaved.clear();
        count
    }

    pub fn recordings(&self, tab_id: &str) -> MuxResult<Vec<RecordingInfo>> {
        self.store.list(tab_id)
    }

    pub fn delete_recording(&mut self, tab_id: &str, name: &str) -> MuxResult<()> {
        self.store.delete(tab_id, name)
    }

    /// Load a stored recording into a fresh playback engine.
    pub fn load_playback(&self, tab_id: &str, name: &str) -> MuxResult<PlaybackEngine> {
        let text = self.store.load(tab_id, name)?;
        PlaybackEngine::from_cast_text(&text)
    }

    // ── Output capture ───────────────────────────────────────────────

    /// Mark the cursor line of the tab's active sub-session, superseding
    /// any earlier mark on it.
    pub fn mark_command_start(&mut self, tab_id: &str) -> Option<Mark> {
        let sub = self.mux.tab_mut(tab_id)?.active_mut()?;
        let mark = mark_command_start(sub.conn.buffer(), sub.id);
        sub.mark = Some(mark.clone());
        Some(mark)
    }

    /// Capture against `mark`. `None` once its sub-session is gone.
    pub fn capture_output_from_mark(&self, tab_id: &str, mark: &Mark) -> Option<Capture> {
        let sub = self.mux.tab(tab_id)?.sub(mark.sub_id)?;
        Some(capture_output_from_mark(sub.conn.buffer(), mark))
    }

    /// Capture against the active sub-session's latest mark.
    pub fn capture_since_mark(&self, tab_id: &str) -> Option<Capture> {
        let sub = self.mux.tab(tab_id)?.active()?;
        let mark = sub.mark.as_ref()?;
        Some(capture_output_from_mark(sub.conn.buffer(), mark))
    }
}
