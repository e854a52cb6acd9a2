//! Extracting the output of the most recent command from scroll history.
//!
//! A [`Mark`] is taken right before a command is sent, while the cursor sits
//! on the prompt line. Later, everything between that line and the new cursor
//! line is the command's output. Both operations only read the buffer.

use tabmux_core::TerminalBuffer;

use crate::SubId;

/// Prefixed to captured text when the start of the output was evicted.
pub const TRUNCATION_MARKER: &str = "[output truncated: earlier lines left the scrollback]\n";

/// Snapshot of the prompt line a command was typed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    /// Sub-session whose buffer the mark refers to.
    pub sub_id: SubId,
    /// Absolute line index of the prompt.
    pub line: usize,
    /// Text of that line when the mark was taken.
    pub prompt_text: String,
}

/// Result of a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// Nothing was printed between the command and the cursor.
    NoOutput,
    /// Output lines joined with `\n`.
    Output { text: String, truncated: bool },
}

impl Capture {
    pub fn text(&self) -> Option<&str> {
        match self {
            Capture::NoOutput => None,
            Capture::Output { text, .. } => Some(text),
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, Capture::Output { truncated: true, .. })
    }
}

/// Mark the current cursor line as the start of a command.
pub fn mark_command_start(buffer: &dyn TerminalBuffer, sub_id: SubId) -> Mark {
    let (line, _) = buffer.cursor();
    Mark {
        sub_id,
        line,
        prompt_text: buffer.line(line).unwrap_or_default(),
    }
}

fn visible_len(text: &str) -> usize {
    text.trim_end().chars().count()
}

fn is_blank(buffer: &dyn TerminalBuffer, line: usize) -> bool {
    buffer.line(line).map_or(true, |l| l.trim().is_empty())
}

/// Text produced since `mark`, read from the buffer's current state.
pub fn capture_output_from_mark(buffer: &dyn TerminalBuffer, mark: &Mark) -> Capture {
    let oldest = buffer.oldest_retained();
    let mut start = mark.line + 1;
    let mut truncated = false;

    if mark.line < oldest {
        start = oldest;
        truncated = true;
    } else {
        // The echoed command normally extends the prompt line. If the line is
        // no longer than the prompt alone, the echo is gone and output begins
        // on the mark line itself.
        let current = buffer.line(mark.line).unwrap_or_default();
        if visible_len(&current) <= visible_len(&mark.prompt_text) {
            start = mark.line;
        }
    }

    let (cursor_line, _) = buffer.cursor();
    let Some(mut end) = cursor_line.checked_sub(1) else {
        return Capture::NoOutput;
    };
    loop {
        if end < start {
            return Capture::NoOutput;
        }
        if !is_blank(buffer, end) {
            break;
        }
        match end.checked_sub(1) {
            Some(prev) => end = prev,
            None => return Capture::NoOutput,
        }
    }

    let lines: Vec<String> = (start..=end)
        .map(|i| buffer.line(i).unwrap_or_default().trim_end().to_string())
        .collect();
    let mut text = lines.join("\n");
    if truncated {
        text.insert_str(0, TRUNCATION_MARKER);
    }
    Capture::Output { text, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabmux_core::{Geometry, LineBuffer};

    fn shell() -> LineBuffer {
        let mut buf = LineBuffer::new(Geometry::new(80, 24), 100);
        buf.write("welcome\r\n$ ");
        buf
    }

    #[test]
    fn captures_lines_between_command_and_prompt() {
        let mut buf = shell();
        let mark = mark_command_start(&buf, 1);
        assert_eq!(mark.line, 1);
        assert_eq!(mark.prompt_text, "$ ");

        buf.write("ls\r\nCargo.toml\r\nsrc\r\n\r\n$ ");
        let capture = capture_output_from_mark(&buf, &mark);
        assert_eq!(
            capture,
            Capture::Output {
                text: "Cargo.toml\nsrc".into(),
                truncated: false
            }
        );
    }

    #[test]
    fn no_output_when_prompt_follows_command() {
        let mut buf = shell();
        let mark = mark_command_start(&buf, 1);
        buf.write("true\r\n$ ");
        assert_eq!(capture_output_from_mark(&buf, &mark), Capture::NoOutput);
    }

    #[test]
    fn no_output_before_anything_is_echoed() {
        let buf = shell();
        let mark = mark_command_start(&buf, 1);
        assert_eq!(capture_output_from_mark(&buf, &mark), Capture::NoOutput);
    }

    #[test]
    fn missing_echo_starts_at_mark_line() {
        let mut buf = shell();
        let mark = mark_command_start(&buf, 1);
        // Output overwrote the prompt line without echoing the command.
        buf.write("\rx\r\n$ ");
        assert_eq!(capture_output_from_mark(&buf, &mark).text(), Some("x"));
    }

    #[test]
    fn evicted_mark_is_clamped_and_flagged() {
        let mut buf = LineBuffer::new(Geometry::new(80, 2), 2);
        buf.write("$ ");
        let mark = mark_command_start(&buf, 1);
        buf.write("seq 6\r\n1\r\n2\r\n3\r\n4\r\n5\r\n6\r\n$ ");
        assert!(buf.oldest_retained() > mark.line);

        let capture = capture_output_from_mark(&buf, &mark);
        assert!(capture.is_truncated());
        let text = capture.text().unwrap();
        assert!(text.starts_with(TRUNCATION_MARKER));
        assert!(text.ends_with("5\n6"));
        assert!(!text.contains("seq"));
    }

    #[test]
    fn repeated_capture_is_stable() {
        let mut buf = shell();
        let mark = mark_command_start(&buf, 1);
        buf.write("echo hi\r\nhi\r\n$ ");
        let first = capture_output_from_mark(&buf, &mark);
        let second = capture_output_from_mark(&buf, &mark);
        assert_eq!(first, second);
        assert_eq!(first.text(), Some("hi"));
    }
}
