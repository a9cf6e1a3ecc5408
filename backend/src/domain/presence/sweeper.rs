//! Periodic presence sweep.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::domain::SessionCloseReason;
use crate::domain::epoch_manager::TokenEpochManager;

use super::PresenceTracker;

/// What one sweep closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions closed for missing heartbeats.
    pub idle_closed: u64,
    /// Sessions closed after two rotations.
    pub epoch_closed: u64,
    /// Sessions that could not be closed this round.
    pub failed: u64,
}

impl SweepReport {
    pub(super) fn record(&mut self, reason: SessionCloseReason) {
        match reason {
            SessionCloseReason::IdleTimeout => self.idle_closed += 1,
            SessionCloseReason::EpochExpiredTwice => self.epoch_closed += 1,
            SessionCloseReason::ExplicitLeave => {}
        }
    }

    /// Total sessions closed.
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.idle_closed + self.epoch_closed
    }
}

/// Drives [`PresenceTracker::sweep`] on a fixed interval.
pub struct PresenceSweeper {
    tracker: Arc<PresenceTracker>,
    epochs: Arc<TokenEpochManager>,
    interval: Duration,
}

impl PresenceSweeper {
    /// Build a sweeper.
    #[must_use]
    pub fn new(
        tracker: Arc<PresenceTracker>,
        epochs: Arc<TokenEpochManager>,
        interval: Duration,
    ) -> Self {
        Self {
            tracker,
            epochs,
            interval,
        }
    }

    /// Run a single sweep using the epochs currently published.
    pub async fn sweep_once(&self) -> SweepReport {
        let epochs = Arc::clone(&self.epochs);
        let report = self
            .tracker
            .sweep(move |venue_id| {
                epochs
                    .peek(venue_id)
                    .map(|snapshot| snapshot.current.epoch_sequence)
            })
            .await;
        if report.closed() > 0 || report.failed > 0 {
            info!(
                idle_closed = report.idle_closed,
                epoch_closed = report.epoch_closed,
                failed = report.failed,
                "presence sweep closed sessions"
            );
        } else {
            debug!("presence sweep found nothing to close");
        }
        report
    }

    /// Run until the task is aborted.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }
}
