//! Trailing-window mean of closed-session stay lengths.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};

/// Streaming mean over stays closed within the last `window`.
///
/// Each close is pushed once and evicted once, so recording and reading are
/// amortised O(1) and never rescan history.
#[derive(Debug, Clone)]
pub(crate) struct StayWindow {
    window: TimeDelta,
    entries: VecDeque<(DateTime<Utc>, i64)>,
    total_seconds: i64,
}

impl StayWindow {
    pub(crate) fn new(window: TimeDelta) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
            total_seconds: 0,
        }
    }

    /// Record a stay that ended at `closed_at`.
    pub(crate) fn record(&mut self, closed_at: DateTime<Utc>, stay: TimeDelta) {
        let seconds = stay.num_seconds().max(0);
        self.entries.push_back((closed_at, seconds));
        self.total_seconds = self.total_seconds.saturating_add(seconds);
        self.evict(closed_at);
    }

    /// Mean stay over the window ending at `now`.
    pub(crate) fn mean(&mut self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.evict(now);
        let count = i64::try_from(self.entries.len()).ok().filter(|n| *n > 0)?;
        Some(TimeDelta::seconds(self.total_seconds / count))
    }

    /// Closed sessions inside the window as of the last eviction.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.window;
        while let Some((closed_at, seconds)) = self.entries.front().copied() {
            if closed_at >= horizon {
                break;
            }
            self.entries.pop_front();
            self.total_seconds = self.total_seconds.saturating_sub(seconds);
        }
    }
}
