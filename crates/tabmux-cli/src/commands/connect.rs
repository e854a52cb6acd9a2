//! `tabmux connect`: interactive multiplexed session.
//!
//! Opens one tab against the configured endpoint, enters raw terminal mode
//! and pipes keystrokes to the tab's active shell. Ctrl+B starts a command:
//!
//! | key | action                          |
//! |-----|---------------------------------|
//! | `c` | new shell                       |
//! | `n` | next shell                      |
//! | `p` | previous shell                  |
//! | `x` | remove the active shell         |
//! | `r` | start/stop recording            |
//! | `a` | toggle auto-record              |
//! | `m` | mark the start of a command     |
//! | `o` | show output since the mark      |
//! | `q` | quit                            |
//!
//! Ctrl+B twice sends a literal Ctrl+B.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tabmux_client::{
    event_channel, Capture, Command, RecordingToggle, Runtime, RuntimeHandle, StopOutcome,
    Workspace, WorkspaceConfig, WsTransportFactory, MAX_SUB_SESSIONS,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::recordings::open_store;
use crate::terminal::{self as term, StdoutView, TerminalSurface};

pub struct ConnectOpts {
    pub url: String,
    pub token: String,
    pub tab: String,
    pub record: bool,
    pub scrollback: usize,
    pub recordings_dir: Option<PathBuf>,
}

/// What a keystroke asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Input(String),
    NewShell,
    Next,
    Prev,
    Remove,
    ToggleRecording,
    ToggleAutoRecord,
    Mark,
    Capture,
    Resize,
    Quit,
}

/// Ctrl+B prefix handling.
#[derive(Debug, Default)]
pub struct Keymap {
    armed: bool,
}

impl Keymap {
    pub fn feed(&mut self, key: &KeyEvent) -> Option<Action> {
        let prefix = key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('b');
        if !self.armed {
            if prefix {
                self.armed = true;
                return None;
            }
            return key_event_to_bytes(key).map(|b| Action::Input(String::from_utf8_lossy(&b).into_owned()));
        }

        self.armed = false;
        if prefix {
            return Some(Action::Input("\x02".into()));
        }
        match key.code {
            KeyCode::Char('c') => Some(Action::NewShell),
            KeyCode::Char('n') => Some(Action::Next),
            KeyCode::Char('p') => Some(Action::Prev),
            KeyCode::Char('x') => Some(Action::Remove),
            KeyCode::Char('r') => Some(Action::ToggleRecording),
            KeyCode::Char('a') => Some(Action::ToggleAutoRecord),
            KeyCode::Char('m') => Some(Action::Mark),
            KeyCode::Char('o') => Some(Action::Capture),
            KeyCode::Char('q') => Some(Action::Quit),
            _ => None,
        }
    }
}

/// Run an interactive session until the user quits.
pub async fn run(opts: ConnectOpts) -> Result<()> {
    info!(url = %opts.url, tab = %opts.tab, "connecting");
    let store = open_store(opts.recordings_dir.clone())?;

    let (events_tx, events_rx) = event_channel();
    let mut workspace = Workspace::new(
        WorkspaceConfig {
            token: opts.token.clone(),
            scrollback: opts.scrollback,
            auto_record: opts.record,
        },
        Box::new(WsTransportFactory::new(opts.url.clone(), events_tx)),
        Box::new(store),
        Box::new(StdoutView),
        Box::new(TerminalSurface),
    );

    let _guard = term::RawModeGuard::enter().context("failed to enter raw terminal mode")?;

    let now = Instant::now();
    if !workspace.create_tab(&opts.tab, now) {
        anyhow::bail!("could not create tab '{}'", opts.tab);
    }
    workspace.activate_tab(&opts.tab, now);

    let runtime = Runtime::new(workspace, events_rx);
    let handle = runtime.handle();
    let runtime_task = tokio::spawn(runtime.run());

    let (tx_action, mut rx_action) = mpsc::channel::<Action>(64);

    // Spawn a blocking thread to read crossterm events (stdin + resize).
    let input_handle = tokio::task::spawn_blocking(move || {
        let mut keymap = Keymap::default();
        loop {
            let action = match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => keymap.feed(&key),
                Ok(Event::Resize(_, _)) => Some(Action::Resize),
                Ok(_) => None,
                Err(e) => {
                    warn!("crossterm event error: {e}");
                    Some(Action::Quit)
                }
            };
            if let Some(action) = action {
                let quit = action == Action::Quit;
                if tx_action.blocking_send(action).is_err() || quit {
                    break;
                }
            }
        }
    });

    let mut auto_record = opts.record;
    while let Some(action) = rx_action.recv().await {
        if action == Action::Quit {
            info!("quit requested");
            break;
        }
        if !dispatch(&handle, &opts.tab, action, &mut auto_record).await {
            break;
        }
    }

    handle.shutdown().await;
    input_handle.abort();
    let workspace = runtime_task.await.context("runtime task failed")?;
    drop(_guard);

    for held in workspace.unsaved() {
        eprintln!(
            "tabmux: recording '{}' of tab '{}' was not saved: {}",
            held.name,
            held.session.tab_id(),
            held.reason
        );
    }
    eprintln!("tabmux: session closed.");
    Ok(())
}

/// Carry out one action. False once the runtime is gone.
async fn dispatch(handle: &RuntimeHandle, tab: &str, action: Action, auto_record: &mut bool) -> bool {
    let tab_id = tab.to_string();
    match action {
        Action::Input(data) => handle.input(tab, &data).await,
        Action::Resize => handle.send(Command::Resize).await,
        Action::NewShell => {
            if handle.sub_sessions(tab).await.len() >= MAX_SUB_SESSIONS {
                term::status(&format!("shell limit ({MAX_SUB_SESSIONS}) reached"));
                return true;
            }
            handle.send(Command::NewShell(tab_id)).await
        }
        Action::Next => handle.send(Command::Cycle(tab_id, true)).await,
        Action::Prev => handle.send(Command::Cycle(tab_id, false)).await,
        Action::Remove => {
            let subs = handle.sub_sessions(tab).await;
            if subs.len() <= 1 {
                term::status("cannot remove the last shell");
                return true;
            }
            match subs.iter().find(|s| s.active) {
                Some(active) => handle.send(Command::RemoveShell(tab_id, active.id)).await,
                None => true,
            }
        }
        Action::ToggleRecording => {
            match handle.toggle_recording(tab).await {
                Some(RecordingToggle::Started) => term::status("recording"),
                Some(RecordingToggle::Stopped(outcome)) => term::status(&describe_stop(&outcome)),
                None => debug!(tab, "recording toggle ignored"),
            }
            true
        }
        Action::ToggleAutoRecord => {
            *auto_record = !*auto_record;
            term::status(if *auto_record { "auto-record on" } else { "auto-record off" });
            handle.send(Command::SetAutoRecord(*auto_record)).await
        }
        Action::Mark => {
            term::status("mark set");
            handle.send(Command::Mark(tab_id)).await
        }
        Action::Capture => {
            match handle.capture(tab).await {
                Some(capture) => term::status(&describe_capture(&capture)),
                None => term::status("no mark set (Ctrl+B m)"),
            }
            true
        }
        Action::Quit => false,
    }
}

fn describe_stop(outcome: &StopOutcome) -> String {
    match outcome {
        StopOutcome::NotRecording => "not recording".to_string(),
        StopOutcome::Empty => "recording stopped, nothing captured".to_string(),
        StopOutcome::Saved { name } => format!("recording saved as '{name}'"),
        StopOutcome::Unsaved { name, reason } => format!("recording '{name}' not saved: {reason}"),
    }
}

fn describe_capture(capture: &Capture) -> String {
    match capture {
        Capture::NoOutput => "no output since mark".to_string(),
        Capture::Output { text, truncated } => {
            let lines = text.lines().count();
            let last = text.lines().last().unwrap_or_default();
            let note = if *truncated { " (truncated)" } else { "" };
            format!("{lines} line(s) since mark{note}; last: {last}")
        }
    }
}

/// Convert a crossterm key event to raw bytes suitable for a PTY.
fn key_event_to_bytes(event: &KeyEvent) -> Option<Vec<u8>> {
    match event.code {
        KeyCode::Char(c) => {
            if event.modifiers.contains(KeyModifiers::CONTROL) {
                // Ctrl+A = 0x01, Ctrl+B = 0x02, etc.
                let byte = (c as u8).wrapping_sub(b'a').wrapping_add(1);
                if byte <= 26 {
                    return Some(vec![byte]);
                }
            }
            let mut buf = [0u8; 4];
            let s = c.encode_utf8(&mut buf);
            Some(s.as_bytes().to_vec())
        }
        KeyCode::Enter => Some(vec![b'\r']),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => Some(b"\x1b[A".to_vec()),
        KeyCode::Down => Some(b"\x1b[B".to_vec()),
        KeyCode::Right => Some(b"\x1b[C".to_vec()),
        KeyCode::Left => Some(b"\x1b[D".to_vec()),
        KeyCode::Home => Some(b"\x1b[H".to_vec()),
        KeyCode::End => Some(b"\x1b[F".to_vec()),
        KeyCode::PageUp => Some(b"\x1b[5~".to_vec()),
        KeyCode::PageDown => Some(b"\x1b[6~".to_vec()),
        KeyCode::Delete => Some(b"\x1b[3~".to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn plain_keys_pass_through() {
        let mut keymap = Keymap::default();
        assert_eq!(keymap.feed(&key(KeyCode::Char('l'))), Some(Action::Input("l".into())));
        assert_eq!(keymap.feed(&key(KeyCode::Enter)), Some(Action::Input("\r".into())));
        assert_eq!(keymap.feed(&ctrl('c')), Some(Action::Input("\x03".into())));
        assert_eq!(keymap.feed(&key(KeyCode::Up)), Some(Action::Input("\x1b[A".into())));
    }

    #[test]
    fn prefix_selects_commands() {
        let mut keymap = Keymap::default();
        for (c, action) in [
            ('c', Action::NewShell),
            ('n', Action::Next),
            ('p', Action::Prev),
            ('x', Action::Remove),
            ('r', Action::ToggleRecording),
            ('q', Action::Quit),
        ] {
            assert_eq!(keymap.feed(&ctrl('b')), None);
            assert_eq!(keymap.feed(&key(KeyCode::Char(c))), Some(action));
        }
    }

    #[test]
    fn double_prefix_sends_literal() {
        let mut keymap = Keymap::default();
        keymap.feed(&ctrl('b'));
        assert_eq!(keymap.feed(&ctrl('b')), Some(Action::Input("\x02".into())));
        assert_eq!(keymap.feed(&key(KeyCode::Char('c'))), Some(Action::Input("c".into())));
    }

    #[test]
    fn unknown_command_is_swallowed() {
        let mut keymap = Keymap::default();
        keymap.feed(&ctrl('b'));
        assert_eq!(keymap.feed(&key(KeyCode::Char('z'))), None);
        assert_eq!(keymap.feed(&key(KeyCode::Char('z'))), Some(Action::Input("z".into())));
    }

    #[test]
    fn capture_descriptions() {
        assert_eq!(describe_capture(&Capture::NoOutput), "no output since mark");
        let capture = Capture::Output {
            text: "a\nb".into(),
            truncated: true,
        };
        assert_eq!(describe_capture(&capture), "2 line(s) since mark (truncated); last: b");
        assert_eq!(
            describe_stop(&StopOutcome::Saved { name: "rec-1".into() }),
            "recording saved as 'rec-1'"
        );
    }
}
