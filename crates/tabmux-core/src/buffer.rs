//! Terminal buffer contract and a plain line-oriented implementation.
//!
//! The contract is deliberately small: absolute-line lookup, the cursor, the
//! total length and the oldest retained line are all that rendering and
//! output capture need. Full ANSI interpretation belongs to whatever widget
//! implements the trait for real; [`LineBuffer`] only skips escape sequences
//! so that their bytes never land in the text.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default retained history beyond the viewport, in lines.
pub const DEFAULT_SCROLLBACK: usize = 1000;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// A line-addressable emulated screen plus scrollback.
///
/// Line indices are absolute: they keep counting up as old lines are evicted,
/// so an index taken earlier still names the same line (or names nothing,
/// once it falls below [`oldest_retained`](TerminalBuffer::oldest_retained)).
pub trait TerminalBuffer {
    /// Feed output from the remote shell.
    fn write(&mut self, data: &str);

    /// Text of the line at an absolute index, if still retained.
    fn line(&self, index: usize) -> Option<String>;

    /// Cursor as `(absolute line, column)`.
    fn cursor(&self) -> (usize, usize);

    /// One past the newest absolute line index.
    fn length(&self) -> usize;

    /// Absolute index of the oldest line still retained.
    fn oldest_retained(&self) -> usize;

    fn geometry(&self) -> Geometry;

    fn resize(&mut self, geometry: Geometry);

    /// Drop all content and history.
    fn clear(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Esc,
    Csi,
    Osc,
    OscEsc,
}

/// Line-oriented terminal buffer with bounded scrollback.
///
/// Retains at most `rows + scrollback` lines; older lines are evicted from
/// the front. A line feed also returns the carriage, matching what a remote
/// pty emits for `\n`.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    lines: VecDeque<Vec<char>>,
    /// Absolute index of `lines[0]`.
    oldest: usize,
    cursor_row: usize,
    cursor_col: usize,
    geometry: Geometry,
    scrollback: usize,
    escape: Escape,
}

impl LineBuffer {
    pub fn new(geometry: Geometry, scrollback: usize) -> Self {
        let mut lines = VecDeque::new();
        lines.push_back(Vec::new());
        Self {
            lines,
            oldest: 0,
            cursor_row: 0,
            cursor_col: 0,
            geometry,
            scrollback,
            escape: Escape::None,
        }
    }

    /// Every retained line, right-trimmed, with trailing blank lines dropped.
    pub fn text(&self) -> String {
        let mut lines: Vec<String> = self
            .lines
            .iter()
            .map(|l| l.iter().collect::<String>().trim_end().to_string())
            .collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    /// The last `rows` retained lines, as they would appear on screen.
    pub fn screen(&self) -> Vec<String> {
        let rows = self.geometry.rows as usize;
        let skip = self.lines.len().saturating_sub(rows);
        self.lines
            .iter()
            .skip(skip)
            .map(|l| l.iter().collect())
            .collect()
    }

    fn capacity(&self) -> usize {
        (self.geometry.rows as usize + self.scrollback).max(1)
    }

    fn evict(&mut self) {
        while self.lines.len() > self.capacity() && self.cursor_row > 0 {
            self.lines.pop_front();
            self.oldest += 1;
            self.cursor_row -= 1;
        }
    }

    fn line_feed(&mut self) {
        self.cursor_row += 1;
        self.cursor_col = 0;
        if self.cursor_row == self.lines.len() {
            self.lines.push_back(Vec::new());
        }
        self.evict();
    }

    fn put_char(&mut self, ch: char) {
        if self.cursor_col >= self.geometry.cols as usize {
            self.line_feed();
        }
        let col = self.cursor_col;
        let line = &mut self.lines[self.cursor_row];
        if line.len() < col {
            line.resize(col, ' ');
        }
        if col < line.len() {
            line[col] = ch;
        } else {
            line.push(ch);
        }
        self.cursor_col += 1;
    }

    fn feed(&mut self, ch: char) {
        match self.escape {
            Escape::None => match ch {
                '\x1b' => self.escape = Escape::Esc,
                '\n' => self.line_feed(),
                '\r' => self.cursor_col = 0,
                '\x08' => self.cursor_col = self.cursor_col.saturating_sub(1),
                '\t' => {
                    let next = (self.cursor_col / 8 + 1) * 8;
                    self.cursor_col = next.min(self.geometry.cols.saturating_sub(1) as usize);
                }
                c if c.is_control() => {}
                c => self.put_char(c),
            },
            Escape::Esc => {
                self.escape = match ch {
                    '[' => Escape::Csi,
                    ']' => Escape::Osc,
                    _ => Escape::None,
                }
            }
            Escape::Csi => {
                if ('\x40'..='\x7e').contains(&ch) {
                    self.escape = Escape::None;
                }
            }
            Escape::Osc => match ch {
                '\x07' => self.escape = Escape::None,
                '\x1b' => self.escape = Escape::OscEsc,
                _ => {}
            },
            Escape::OscEsc => {
                self.escape = if ch == '\\' { Escape::None } else { Escape::Osc };
            }
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(Geometry::default(), DEFAULT_SCROLLBACK)
    }
}

impl TerminalBuffer for LineBuffer {
    fn write(&mut self, data: &str) {
        for ch in data.chars() {
            self.feed(ch);
        }
    }

    fn line(&self, index: usize) -> Option<String> {
        let offset = index.checked_sub(self.oldest)?;
        self.lines.get(offset).map(|l| l.iter().collect())
    }

    fn cursor(&self) -> (usize, usize) {
        (self.oldest + self.cursor_row, self.cursor_col)
    }

    fn length(&self) -> usize {
        self.oldest + self.lines.len()
    }

    fn oldest_retained(&self) -> usize {
        self.oldest
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn resize(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        self.evict();
    }

    fn clear(&mut self) {
        *self = Self::new(self.geometry, self.scrollback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(cols: u16, rows: u16, scrollback: usize) -> LineBuffer {
        LineBuffer::new(Geometry::new(cols, rows), scrollback)
    }

    #[test]
    fn basic_write_read() {
        let mut buf = LineBuffer::default();
        buf.write("hello\r\nworld");
        assert_eq!(buf.line(0).as_deref(), Some("hello"));
        assert_eq!(buf.line(1).as_deref(), Some("world"));
        assert_eq!(buf.cursor(), (1, 5));
        assert_eq!(buf.length(), 2);
        assert_eq!(buf.text(), "hello\nworld");
    }

    #[test]
    fn carriage_return_overwrites() {
        let mut buf = LineBuffer::default();
        buf.write("loading...\rdone");
        assert_eq!(buf.line(0).as_deref(), Some("doneing..."));
    }

    #[test]
    fn wraps_at_column_limit() {
        let mut buf = small(4, 10, 0);
        buf.write("abcdef");
        assert_eq!(buf.line(0).as_deref(), Some("abcd"));
        assert_eq!(buf.line(1).as_deref(), Some("ef"));
        assert_eq!(buf.cursor(), (1, 2));
    }

    #[test]
    fn evicts_oldest_lines() {
        let mut buf = small(80, 2, 1);
        buf.write("one\ntwo\nthree\nfour\n");
        // capacity is rows + scrollback = 3 lines
        assert_eq!(buf.oldest_retained(), 2);
        assert_eq!(buf.line(1), None);
        assert_eq!(buf.line(2).as_deref(), Some("three"));
        assert_eq!(buf.line(3).as_deref(), Some("four"));
        assert_eq!(buf.cursor(), (4, 0));
        assert_eq!(buf.length(), 5);
    }

    #[test]
    fn skips_escape_sequences() {
        let mut buf = LineBuffer::default();
        buf.write("\x1b[1;32mgreen\x1b[0m \x1b]0;title\x07ok \x1b]2;t\x1b\\end");
        assert_eq!(buf.text(), "green ok end");
    }

    #[test]
    fn escape_split_across_writes() {
        let mut buf = LineBuffer::default();
        buf.write("a\x1b[3");
        buf.write("1mb");
        assert_eq!(buf.text(), "ab");
    }

    #[test]
    fn backspace_and_tab() {
        let mut buf = LineBuffer::default();
        buf.write("ab\x08c\td");
        assert_eq!(buf.line(0).as_deref(), Some("ac      d"));
    }

    #[test]
    fn clear_resets_history() {
        let mut buf = small(80, 2, 0);
        buf.write("a\nb\nc\n");
        assert!(buf.oldest_retained() > 0);
        buf.clear();
        assert_eq!(buf.oldest_retained(), 0);
        assert_eq!(buf.length(), 1);
        assert_eq!(buf.text(), "");
        assert_eq!(buf.geometry(), Geometry::new(80, 2));
    }

    #[test]
    fn screen_shows_last_rows() {
        let mut buf = small(80, 2, 10);
        buf.write("a\nb\nc");
        assert_eq!(buf.screen(), vec!["b".to_string(), "c".to_string()]);
    }
}
