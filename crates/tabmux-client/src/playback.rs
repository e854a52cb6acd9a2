//! Replaying a recorded event log with seeking and variable speed.
//!
//! Seeking always rebuilds the virtual buffer from the first event, so any
//! position, forward or backward, yields the same content. Playback schedules
//! each upcoming write on the engine's own task queue; anything that changes
//! the timeline (seek, speed, pause, scrub, close) revokes every pending
//! write first.

use std::time::{Duration, Instant};

use tabmux_core::cast::{parse_cast, CastEvent};
use tabmux_core::{Geometry, LineBuffer, MuxResult, TaskQueue, TerminalBuffer};
use tracing::{debug, warn};

use crate::recorder::RecordingSession;

/// Speed multipliers, in cycling order.
pub const SPEEDS: [f64; 4] = [1.0, 2.0, 4.0, 0.5];

/// Playback buffers keep the whole recording reachable.
const PLAYBACK_SCROLLBACK: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Paused,
    Playing,
    /// Paused at the end after the last event was written.
    Finished,
    /// Closed for good; every operation is a no-op.
    Closed,
}

/// Reconstructs terminal output from an ordered event list.
pub struct PlaybackEngine {
    events: Vec<CastEvent>,
    geometry: Geometry,
    buffer: LineBuffer,
    /// Pending writes, by event index.
    queue: TaskQueue<usize>,
    state: PlaybackState,
    speed_idx: usize,
    /// Timeline position while not playing.
    position: f64,
    /// While playing: the wall-clock instant and timeline position play began at.
    anchor: Option<(Instant, f64)>,
    /// Count of leading events currently written into `buffer`.
    applied: usize,
    scrubbing: bool,
}

impl PlaybackEngine {
    pub fn new(events: Vec<CastEvent>, geometry: Geometry) -> Self {
        Self {
            events,
            geometry,
            buffer: LineBuffer::new(geometry, PLAYBACK_SCROLLBACK),
            queue: TaskQueue::new(),
            state: PlaybackState::Paused,
            speed_idx: 0,
            position: 0.0,
            anchor: None,
            applied: 0,
            scrubbing: false,
        }
    }

    /// Build from cast text. Malformed input fails before any engine exists.
    pub fn from_cast_text(text: &str) -> MuxResult<Self> {
        let cast = parse_cast(text)?;
        Ok(Self::new(cast.events, cast.header.geometry()))
    }

    pub fn from_recording(recording: &RecordingSession) -> Self {
        Self::new(recording.events().to_vec(), recording.geometry())
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn speed(&self) -> f64 {
        SPEEDS[self.speed_idx]
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn events(&self) -> &[CastEvent] {
        &self.events
    }

    /// Timestamp of the last event.
    pub fn duration(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.elapsed)
    }

    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    /// Writes still scheduled.
    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    pub fn is_scrubbing(&self) -> bool {
        self.scrubbing
    }

    /// Current timeline position in seconds.
    pub fn position(&self, now: Instant) -> f64 {
        match (self.state, self.anchor) {
            (PlaybackState::Playing, Some((started, from))) => {
                let played = now.saturating_duration_since(started).as_secs_f64() * self.speed();
                (from + played).min(self.duration().max(from))
            }
            _ => self.position,
        }
    }

    /// Rebuild the buffer to show every event with `elapsed <= t`.
    ///
    /// Stops playback; pending writes are revoked.
    pub fn seek_to(&mut self, t: f64) {
        if self.state == PlaybackState::Closed {
            return;
        }
        self.queue.clear();
        self.anchor = None;
        self.state = PlaybackState::Paused;
        let upto = self.events.partition_point(|e| e.elapsed <= t);
        self.render(upto);
        self.position = t.max(0.0);
        debug!(position = self.position, events = upto, "seek");
    }

    /// Seek, resuming playback afterwards if it was playing.
    pub fn seek(&mut self, t: f64, now: Instant) {
        let was_playing = self.state == PlaybackState::Playing;
        self.seek_to(t);
        if was_playing {
            self.play_from(t, now);
        }
    }

    /// Start playing at `t` with the current speed.
    pub fn play_from(&mut self, t: f64, now: Instant) {
        if self.state == PlaybackState::Closed {
            return;
        }
        self.queue.clear();
        self.scrubbing = false;
        let t = t.max(0.0);
        let first = self.events.partition_point(|e| e.elapsed < t);
        self.render(first);
        self.position = t;

        if first == self.events.len() {
            self.finish();
            return;
        }
        let speed = self.speed();
        for (idx, event) in self.events.iter().enumerate().skip(first) {
            let due = Duration::try_from_secs_f64(((event.elapsed - t) / speed).max(0.0))
                .ok()
                .and_then(|delay| now.checked_add(delay));
            match due {
                Some(at) => {
                    self.queue.schedule(at, idx);
                }
                None => {
                    warn!(elapsed = event.elapsed, "event beyond the clock range; dropping the rest");
                    break;
                }
            }
        }
        if self.queue.is_empty() {
            self.finish();
            return;
        }
        self.anchor = Some((now, t));
        self.state = PlaybackState::Playing;
    }

    /// Apply every write due by `now`; returns the payloads written.
    pub fn tick(&mut self, now: Instant) -> Vec<String> {
        if self.state != PlaybackState::Playing {
            return Vec::new();
        }
        let mut written = Vec::new();
        for idx in self.queue.pop_due(now) {
            if let Some(event) = self.events.get(idx) {
                self.buffer.write(&event.data);
                written.push(event.data.clone());
                self.applied = idx + 1;
            }
        }
        if self.queue.is_empty() {
            self.finish();
        }
        written
    }

    /// Pause at the current position. Writes already due by `now` are
    /// applied first and returned so the caller can show them.
    pub fn pause(&mut self, now: Instant) -> Vec<String> {
        if self.state != PlaybackState::Playing {
            return Vec::new();
        }
        let flushed = self.tick(now);
        if self.state == PlaybackState::Playing {
            let mut at = self.position(now);
            // Never pause past a write that has not been applied yet.
            if let Some(next) = self.events.get(self.applied) {
                at = at.min(next.elapsed);
            }
            self.position = at;
            self.queue.clear();
            self.anchor = None;
            self.state = PlaybackState::Paused;
        }
        flushed
    }

    /// Pause if playing; otherwise play, restarting from the top once finished.
    /// Returns the writes flushed by a pause.
    pub fn toggle_pause(&mut self, now: Instant) -> Vec<String> {
        match self.state {
            PlaybackState::Playing => return self.pause(now),
            PlaybackState::Paused => self.play_from(self.position, now),
            PlaybackState::Finished => self.play_from(0.0, now),
            PlaybackState::Closed => {}
        }
        Vec::new()
    }

    /// Advance to the next speed in [`SPEEDS`], rescheduling if playing.
    /// Returns the writes that came due before the switch.
    pub fn cycle_speed(&mut self, now: Instant) -> Vec<String> {
        if self.state == PlaybackState::Closed {
            return Vec::new();
        }
        let playing = self.state == PlaybackState::Playing;
        let flushed = if playing { self.pause(now) } else { Vec::new() };
        self.speed_idx = (self.speed_idx + 1) % SPEEDS.len();
        if playing && self.state == PlaybackState::Paused {
            self.play_from(self.position, now);
        }
        flushed
    }

    /// Scrub press: freeze scheduled writes.
    pub fn scrub_begin(&mut self, now: Instant) {
        if self.state == PlaybackState::Closed {
            return;
        }
        let at = self.position(now);
        self.seek_to(at);
        self.scrubbing = true;
    }

    /// Scrub drag: show the buffer at `t`.
    pub fn scrub_to(&mut self, t: f64) {
        if self.scrubbing {
            self.seek_to(t);
        }
    }

    /// Scrub release: resume playing from `t`.
    pub fn scrub_end(&mut self, t: f64, now: Instant) {
        if !self.scrubbing {
            return;
        }
        self.scrubbing = false;
        self.play_from(t, now);
    }

    /// Stop for good, revoking every pending write.
    pub fn close(&mut self) {
        self.queue.clear();
        self.anchor = None;
        self.scrubbing = false;
        self.state = PlaybackState::Closed;
    }

    fn finish(&mut self) {
        self.queue.clear();
        self.anchor = None;
        self.position = self.duration();
        self.state = PlaybackState::Finished;
    }

    /// Clear the buffer and write events `[0, upto)`.
    fn render(&mut self, upto: usize) {
        self.buffer.clear();
        for event in &self.events[..upto] {
            self.buffer.write(&event.data);
        }
        self.applied = upto;
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.close();
    }
}
