//! Revocable scheduled-task queue.
//!
//! One queue per engine instance replaces one-timer-per-closure. Callers
//! inject the current `Instant`, so the queue itself never reads the clock
//! and tests drive time explicitly.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Handle returned by [`TaskQueue::schedule`]; pass it to
/// [`TaskQueue::cancel`] to revoke the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

/// Tasks ordered by deadline, ties broken by scheduling order.
#[derive(Debug)]
pub struct TaskQueue<T> {
    tasks: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
    next_seq: u64,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `task` to become due at `at`.
    pub fn schedule(&mut self, at: Instant, task: T) -> TaskHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert((at, seq), task);
        self.deadlines.insert(seq, at);
        TaskHandle(seq)
    }

    /// Revoke a pending task. Returns the task if it had not fired yet.
    pub fn cancel(&mut self, handle: TaskHandle) -> Option<T> {
        let at = self.deadlines.remove(&handle.0)?;
        self.tasks.remove(&(at, handle.0))
    }

    /// Whether the task behind `handle` is still pending.
    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.deadlines.contains_key(&handle.0)
    }

    /// Remove and return every task due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(entry) = self.tasks.first_entry() {
            let (at, seq) = *entry.key();
            if at > now {
                break;
            }
            due.push(entry.remove());
            self.deadlines.remove(&seq);
        }
        due
    }

    /// Deadline of the earliest pending task.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.keys().next().map(|(at, _)| *at)
    }

    /// Revoke everything.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
