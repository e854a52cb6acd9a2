//! Terminal utilities: raw mode, size, and the stdout view.
//!
//! Wraps crossterm's terminal operations and provides a RAII guard that
//! automatically restores the terminal state on drop.

use std::io::{self, Write};

use anyhow::{Context, Result};
use crossterm::{cursor, queue, terminal};
use tabmux_client::view::screen_lines;
use tabmux_client::{SubId, Surface, ViewSink};
use tabmux_core::{Geometry, TerminalBuffer};

/// RAII guard that restores the terminal to its original mode on drop.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enter raw terminal mode.
    ///
    /// Returns a guard that will automatically restore the terminal when dropped.
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Get the current terminal size as (columns, rows).
///
/// Falls back to (80, 24) if the size cannot be determined.
pub fn get_terminal_size() -> (u16, u16) {
    terminal::size().unwrap_or((80, 24))
}

/// The local terminal as a render surface. One row is kept for status.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalSurface;

impl Surface for TerminalSurface {
    fn measure(&self) -> Geometry {
        let (cols, rows) = get_terminal_size();
        Geometry::new(cols, rows.saturating_sub(1))
    }
}

/// Paint a buffer's screen onto `out`, clearing first.
pub fn paint(out: &mut impl Write, buffer: &dyn TerminalBuffer) -> io::Result<()> {
    queue!(
        out,
        terminal::Clear(terminal::ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    let lines = screen_lines(buffer);
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        out.write_all(line.as_bytes())?;
        if i < last {
            out.write_all(b"\r\n")?;
        }
    }
    out.flush()
}

/// Writes the visible sub-session to stdout.
#[derive(Debug, Default)]
pub struct StdoutView;

impl ViewSink for StdoutView {
    fn output(&mut self, _tab_id: &str, _sub_id: SubId, data: &str) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(data.as_bytes());
        let _ = out.flush();
    }

    fn redraw(&mut self, tab_id: &str, sub_id: SubId, buffer: &dyn TerminalBuffer) {
        let mut out = io::stdout().lock();
        if let Err(e) = paint(&mut out, buffer) {
            tracing::warn!(tab_id, sub_id, "redraw failed: {e}");
        }
    }
}

/// One-line status message on stderr, safe in raw mode.
pub fn status(msg: &str) {
    eprint!("\r\n\x1b[7m tabmux \x1b[0m {msg}\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabmux_core::LineBuffer;

    #[test]
    fn terminal_size_returns_nonzero() {
        let (cols, rows) = get_terminal_size();
        // In a CI environment or pipe, we may get the fallback values.
        assert!(cols > 0);
        assert!(rows > 0);
    }

    #[test]
    fn surface_reserves_status_row() {
        let (_, rows) = get_terminal_size();
        let measured = TerminalSurface.measure();
        assert_eq!(measured.rows, rows.saturating_sub(1).max(1));
    }

    #[test]
    fn paint_writes_screen_lines() {
        let mut buf = LineBuffer::new(Geometry::new(20, 2), 10);
        buf.write("one\r\ntwo\r\nthree");
        let mut out = Vec::new();
        paint(&mut out, &buf).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("two\r\nthree"), "{text:?}");
        assert!(!text.contains("one"));
    }
}
