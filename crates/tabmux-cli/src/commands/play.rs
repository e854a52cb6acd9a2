//! `tabmux play <file>`: replay a cast file in the terminal.
//!
//! Keys: space pauses/resumes (replays once finished), `s` cycles speed,
//! left/right seek five seconds, Home restarts, `q` quits.

use std::io::{self, Write};
use std::time::Instant;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tabmux_client::{PlaybackEngine, PlaybackState, SPEEDS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::terminal as term;

const SEEK_STEP: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayKey {
    TogglePause,
    Speed,
    Back,
    Forward,
    Restart,
    Quit,
}

fn play_key(key: &KeyEvent) -> Option<PlayKey> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(PlayKey::Quit);
    }
    match key.code {
        KeyCode::Char(' ') => Some(PlayKey::TogglePause),
        KeyCode::Char('s') => Some(PlayKey::Speed),
        KeyCode::Left => Some(PlayKey::Back),
        KeyCode::Right => Some(PlayKey::Forward),
        KeyCode::Home => Some(PlayKey::Restart),
        KeyCode::Char('q') | KeyCode::Esc => Some(PlayKey::Quit),
        _ => None,
    }
}

/// Build an engine from cast text and set its speed.
fn prepare(text: &str, speed: f64, now: Instant) -> Result<PlaybackEngine> {
    if !SPEEDS.contains(&speed) {
        anyhow::bail!("unsupported speed {speed} (choose one of 1, 2, 4, 0.5)");
    }
    let mut engine = PlaybackEngine::from_cast_text(text)?;
    while engine.speed() != speed {
        engine.cycle_speed(now);
    }
    Ok(engine)
}

/// Play `file` until it is quit.
pub async fn run(file: &str, speed: f64) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
    let mut engine =
        prepare(&text, speed, Instant::now()).with_context(|| format!("failed to load {file}"))?;
    info!(
        file,
        events = engine.events().len(),
        duration_secs = engine.duration(),
        "playing"
    );

    let _guard = term::RawModeGuard::enter().context("failed to enter raw terminal mode")?;
    let mut stdout = io::stdout();
    term::paint(&mut stdout, engine.buffer())?;

    let (tx_key, mut rx_key) = mpsc::channel::<PlayKey>(16);
    let input_handle = tokio::task::spawn_blocking(move || loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                if let Some(k) = play_key(&key) {
                    if tx_key.blocking_send(k).is_err() || k == PlayKey::Quit {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("crossterm event error: {e}");
                let _ = tx_key.blocking_send(PlayKey::Quit);
                break;
            }
        }
    });

    engine.play_from(0.0, Instant::now());
    let mut announced_end = false;

    loop {
        let deadline = engine.next_deadline();
        let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(
            deadline.unwrap_or_else(Instant::now),
        ));

        tokio::select! {
            key = rx_key.recv() => {
                let now = Instant::now();
                match key {
                    None | Some(PlayKey::Quit) => break,
                    Some(PlayKey::TogglePause) => {
                        write_chunks(&mut stdout, engine.toggle_pause(now))?;
                    }
                    Some(PlayKey::Speed) => {
                        write_chunks(&mut stdout, engine.cycle_speed(now))?;
                        term::status(&format!("speed {}x", engine.speed()));
                    }
                    Some(PlayKey::Back) => {
                        let to = (engine.position(now) - SEEK_STEP).max(0.0);
                        engine.seek(to, now);
                        term::paint(&mut stdout, engine.buffer())?;
                    }
                    Some(PlayKey::Forward) => {
                        let to = engine.position(now) + SEEK_STEP;
                        engine.seek(to, now);
                        term::paint(&mut stdout, engine.buffer())?;
                    }
                    Some(PlayKey::Restart) => {
                        engine.play_from(0.0, now);
                        term::paint(&mut stdout, engine.buffer())?;
                    }
                }
                if engine.state() != PlaybackState::Finished {
                    announced_end = false;
                }
                debug!(state = ?engine.state(), position = engine.position(now), "playback key");
            }
            _ = sleep, if deadline.is_some() => {
                write_chunks(&mut stdout, engine.tick(Instant::now()))?;
            }
        }

        if engine.state() == PlaybackState::Finished && !announced_end {
            term::status("finished; space to replay, q to quit");
            announced_end = true;
        }
    }

    engine.close();
    input_handle.abort();
    Ok(())
}

fn write_chunks(out: &mut impl Write, chunks: Vec<String>) -> io::Result<()> {
    if chunks.is_empty() {
        return Ok(());
    }
    for chunk in chunks {
        out.write_all(chunk.as_bytes())?;
    }
    out.flush()
}
