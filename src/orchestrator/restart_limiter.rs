//! Sliding-window restart limiter.
//!
//! Every restart attempt, manual or automatic, is appended to the history
//! and the head is pruned of entries older than the window. The attempt is
//! refused once the retained count exceeds the allowance, so `k` attempts
//! fit in any window of the configured length and attempt `k + 1` does not.
//! Old attempts age out on their own; there is no reset timer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of recording one restart attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Attempt fits inside the allowance.
    Allowed {
        /// Attempts retained in the window, this one included.
        used: usize,
    },
    /// Allowance exhausted for the current window.
    Denied {
        /// Attempts retained in the window, this one included.
        used: usize,
    },
}

impl RestartDecision {
    /// Whether the attempt may proceed.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Timestamps of restart attempts, oldest first.
#[derive(Debug, Clone)]
pub struct RestartHistory {
    window: Duration,
    max_in_window: usize,
    attempts: VecDeque<Instant>,
}

impl RestartHistory {
    /// Create an empty history for the given window and allowance.
    #[must_use]
    pub fn new(window: Duration, max_in_window: u32) -> Self {
        Self {
            window,
            max_in_window: usize::try_from(max_in_window).unwrap_or(usize::MAX),
            attempts: VecDeque::new(),
        }
    }

    /// Append an attempt at `now`, prune, and decide.
    pub fn record(&mut self, now: Instant) -> RestartDecision {
        self.attempts.push_back(now);
        self.prune(now);
        let used = self.attempts.len();
        if used > self.max_in_window {
            RestartDecision::Denied { used }
        } else {
            RestartDecision::Allowed { used }
        }
    }

    /// Drop every attempt older than `now - window`.
    pub fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while self.attempts.front().is_some_and(|at| *at < cutoff) {
            self.attempts.pop_front();
        }
    }

    /// Retained attempts after pruning at `now`.
    pub fn count_at(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.attempts.len()
    }

    /// Retained attempts as of the last prune.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Whether no attempts are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Forget every attempt.
    pub fn clear(&mut self) {
        self.attempts.clear();
    }
}
