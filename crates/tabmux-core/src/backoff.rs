//! Reconnect backoff policy.
//!
//! Delays double on every consecutive failure and are clamped to
//! `[BACKOFF_FLOOR_MS, BACKOFF_CEILING_MS]`. A successful open resets to the
//! floor.

use std::time::Duration;

/// Smallest reconnect delay.
pub const BACKOFF_FLOOR_MS: u64 = 2_000;
/// Largest reconnect delay.
pub const BACKOFF_CEILING_MS: u64 = 30_000;

/// Exponential reconnect backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    current_ms: u64,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current_ms: BACKOFF_FLOOR_MS,
        }
    }

    /// The delay the next reconnect will wait, in milliseconds.
    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    /// Take the current delay and advance to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_ms;
        self.current_ms = (self.current_ms * 2).clamp(BACKOFF_FLOOR_MS, BACKOFF_CEILING_MS);
        Duration::from_millis(delay)
    }

    /// Back to the floor, after a successful open.
    pub fn reset(&mut self) {
        self.current_ms = BACKOFF_FLOOR_MS;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
