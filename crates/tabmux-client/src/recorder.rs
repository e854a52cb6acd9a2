//! Per-tab session recording.
//!
//! Output from every sub-session of a tab is appended to one log in arrival
//! order, timestamped relative to the recording start. Events are not tagged
//! with the sub-session that produced them: concurrent shells in one tab
//! interleave in the log exactly as their output arrived.

use std::collections::{HashMap, HashSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tabmux_core::cast::{round_elapsed, serialize_cast, CastEvent, CastHeader};
use tabmux_core::{Geometry, MuxResult};
use tracing::{debug, info};

use crate::TabId;

/// An in-progress or finished recording of one tab.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    tab_id: TabId,
    started_at: Instant,
    /// Wall-clock start, milliseconds since the Unix epoch.
    started_unix_ms: u64,
    geometry: Geometry,
    events: Vec<CastEvent>,
}

impl RecordingSession {
    fn new(tab_id: TabId, geometry: Geometry, now: Instant) -> Self {
        let started_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            tab_id,
            started_at: now,
            started_unix_ms,
            geometry,
            events: Vec::new(),
        }
    }

    /// Append an output event. Elapsed time never goes backwards.
    fn push(&mut self, data: &str, now: Instant) {
        let elapsed = round_elapsed(now.saturating_duration_since(self.started_at).as_secs_f64());
        let floor = self.events.last().map_or(0.0, |e| e.elapsed);
        self.events.push(CastEvent::new(elapsed.max(floor), data));
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn events(&self) -> &[CastEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn started_unix_ms(&self) -> u64 {
        self.started_unix_ms
    }

    /// Elapsed time of the last event, in seconds.
    pub fn duration(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.elapsed)
    }

    pub fn header(&self) -> CastHeader {
        CastHeader::new(self.geometry, self.started_unix_ms / 1000)
    }

    /// Serialize to asciicast v2 text.
    pub fn serialize(&self) -> MuxResult<String> {
        serialize_cast(&self.header(), &self.events)
    }

    /// Default name to persist this recording under.
    pub fn default_name(&self) -> String {
        format!("rec-{}", self.started_unix_ms)
    }
}

/// Tracks the active recording of every tab.
#[derive(Debug, Default)]
pub struct Recorder {
    active: HashMap<TabId, RecordingSession>,
    auto_started: HashSet<TabId>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin recording `tab_id`. No-op (returns false) if already recording.
    pub fn start_tab(&mut self, tab_id: &str, geometry: Geometry, now: Instant) -> bool {
        if self.active.contains_key(tab_id) {
            return false;
        }
        info!(tab_id, cols = geometry.cols, rows = geometry.rows, "recording started");
        self.active.insert(
            tab_id.to_string(),
            RecordingSession::new(tab_id.to_string(), geometry, now),
        );
        true
    }

    pub fn is_recording(&self, tab_id: &str) -> bool {
        self.active.contains_key(tab_id)
    }

    /// Output hook: called for every inbound payload of every sub-session.
    pub fn on_data(&mut self, tab_id: &str, data: &str, now: Instant) {
        if let Some(session) = self.active.get_mut(tab_id) {
            session.push(data, now);
        }
    }

    /// Finish the tab's recording. `None` if nothing was captured.
    ///
    /// Output arriving after this call is dropped.
    pub fn stop_tab(&mut self, tab_id: &str) -> Option<RecordingSession> {
        let session = self.active.remove(tab_id)?;
        if session.is_empty() {
            debug!(tab_id, "recording stopped with no events");
            return None;
        }
        info!(
            tab_id,
            events = session.events.len(),
            duration_secs = session.duration(),
            "recording stopped"
        );
        Some(session)
    }

    /// Start recording once per tab when the preference is on.
    pub fn auto_start(&mut self, tab_id: &str, enabled: bool, geometry: Geometry, now: Instant) -> bool {
        if !enabled || self.auto_started.contains(tab_id) {
            return false;
        }
        self.auto_started.insert(tab_id.to_string());
        self.start_tab(tab_id, geometry, now)
    }

    /// Forget per-tab state when the tab goes away.
    pub fn forget_tab(&mut self, tab_id: &str) {
        self.active.remove(tab_id);
        self.auto_started.remove(tab_id);
    }
}
