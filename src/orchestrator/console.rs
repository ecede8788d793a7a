//! Bounded console capture buffer.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Default number of lines retained per instance.
pub const DEFAULT_CONSOLE_CAPACITY: usize = 1000;

/// Fixed-capacity FIFO of the most recent output lines.
///
/// The watcher appends; pollers take snapshots. The lock is held only
/// for one push or one bounded copy.
#[derive(Debug)]
pub struct ConsoleBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl ConsoleBuffer {
    /// Create an empty buffer. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Maximum retained lines.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Current number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the buffer holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last `count` lines in order; `0` means all retained lines.
    #[must_use]
    pub fn tail(&self, count: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let take = if count == 0 {
            lines.len()
        } else {
            count.min(lines.len())
        };
        lines.iter().skip(lines.len() - take).cloned().collect()
    }

    /// Drop all retained lines.
    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_CAPACITY)
    }
}
