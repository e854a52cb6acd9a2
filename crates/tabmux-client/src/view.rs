//! Rendering seams: where visible output goes and where geometry comes from.

use tabmux_core::{Geometry, TerminalBuffer};

use crate::SubId;

/// Receives output of the sub-session currently on screen.
pub trait ViewSink: Send {
    /// Live output from the visible sub-session.
    fn output(&mut self, tab_id: &str, sub_id: SubId, data: &str);

    /// A different sub-session became visible; repaint from its buffer.
    fn redraw(&mut self, tab_id: &str, sub_id: SubId, buffer: &dyn TerminalBuffer);
}

/// The render surface sub-sessions are fitted to.
pub trait Surface: Send {
    fn measure(&self) -> Geometry;
}

/// A surface of constant size.
#[derive(Debug, Clone, Copy)]
pub struct FixedSurface(pub Geometry);

impl Surface for FixedSurface {
    fn measure(&self) -> Geometry {
        self.0
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullView;

impl ViewSink for NullView {
    fn output(&mut self, _tab_id: &str, _sub_id: SubId, _data: &str) {}

    fn redraw(&mut self, _tab_id: &str, _sub_id: SubId, _buffer: &dyn TerminalBuffer) {}
}

/// The last `rows` lines of a buffer, oldest first.
pub fn screen_lines(buffer: &dyn TerminalBuffer) -> Vec<String> {
    let rows = buffer.geometry().rows as usize;
    let end = buffer.length();
    let start = end.saturating_sub(rows).max(buffer.oldest_retained());
    (start..end)
        .map(|i| buffer.line(i).unwrap_or_default())
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// What a [`RecordingView`] was asked to show.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Shown {
        Output(String, SubId, String),
        Redraw(String, SubId),
    }

    #[derive(Clone, Default)]
    pub struct RecordingView {
        pub shown: Arc<Mutex<Vec<Shown>>>,
    }

    impl ViewSink for RecordingView {
        fn output(&mut self, tab_id: &str, sub_id: SubId, data: &str) {
            self.shown
                .lock()
                .unwrap()
                .push(Shown::Output(tab_id.to_string(), sub_id, data.to_string()));
        }

        fn redraw(&mut self, tab_id: &str, sub_id: SubId, _buffer: &dyn TerminalBuffer) {
            self.shown
                .lock()
                .unwrap()
                .push(Shown::Redraw(tab_id.to_string(), sub_id));
        }
    }
}
