//! Background worker that rotates venues when their epochs expire.
//!
//! One min-heap of `(due_at, venue_id, epoch_sequence)` replaces per-venue
//! timers. The heap is rebuilt from persisted `expires_at` values on start-up
//! and on every resync, and each entry names the sequence it expects to
//! supersede, so restarts, duplicate entries and clock drift cannot produce a
//! missed or doubled rotation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::epoch_manager::{TickOutcome, TokenEpochManager};
use crate::domain::{EpochSequence, TokenEpoch, VenueId};

/// One pending rotation. Orders by due time first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DueRotation {
    /// When the epoch expires.
    pub due_at: DateTime<Utc>,
    /// Venue to rotate.
    pub venue_id: VenueId,
    /// Sequence the rotation supersedes.
    pub epoch_sequence: EpochSequence,
}

impl DueRotation {
    /// Entry for the expiry of `epoch`.
    #[must_use]
    pub fn for_epoch(epoch: &TokenEpoch) -> Self {
        Self {
            due_at: epoch.expires_at,
            venue_id: epoch.venue_id,
            epoch_sequence: epoch.epoch_sequence,
        }
    }
}

/// Sending half used by the epoch manager to announce new expiries.
#[derive(Debug, Clone)]
pub struct RotationScheduleHandle {
    tx: mpsc::UnboundedSender<DueRotation>,
}

/// Receiving half consumed by [`RotationScheduler`].
#[derive(Debug)]
pub struct RotationScheduleInbox {
    rx: mpsc::UnboundedReceiver<DueRotation>,
}

/// Create a connected handle and inbox.
#[must_use]
pub fn rotation_schedule_channel() -> (RotationScheduleHandle, RotationScheduleInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RotationScheduleHandle { tx }, RotationScheduleInbox { rx })
}

impl RotationScheduleHandle {
    /// Handle whose announcements go nowhere, for managers without a scheduler.
    #[must_use]
    pub fn detached() -> Self {
        rotation_schedule_channel().0
    }

    /// Announce a new expiry.
    pub fn notify(&self, due: DueRotation) {
        if self.tx.send(due).is_err() {
            debug!(venue_id = %due.venue_id, "rotation scheduler not running");
        }
    }
}

/// Scheduler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSchedulerConfig {
    /// How often the heap is rebuilt from storage.
    pub resync_interval: Duration,
    /// Delay before retrying a venue whose rotation stalled.
    pub stall_retry_interval: Duration,
}

impl Default for RotationSchedulerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            stall_retry_interval: Duration::from_secs(30),
        }
    }
}

/// Min-heap driven rotation worker.
pub struct RotationScheduler {
    manager: Arc<TokenEpochManager>,
    clock: Arc<dyn Clock>,
    inbox: RotationScheduleInbox,
    heap: BinaryHeap<Reverse<DueRotation>>,
    latest: HashMap<VenueId, DueRotation>,
    config: RotationSchedulerConfig,
}

impl RotationScheduler {
    /// Build a scheduler over `manager`, fed by the manager's handle.
    #[must_use]
    pub fn new(
        manager: Arc<TokenEpochManager>,
        clock: Arc<dyn Clock>,
        inbox: RotationScheduleInbox,
        config: RotationSchedulerConfig,
    ) -> Self {
        Self {
            manager,
            clock,
            inbox,
            heap: BinaryHeap::new(),
            latest: HashMap::new(),
            config,
        }
    }

    /// Discard the heap and rebuild it from storage.
    pub async fn rebuild(&mut self) {
        self.heap.clear();
        self.latest.clear();
        for due in self.manager.pending_rotations().await {
            self.push(due);
        }
        self.drain_inbox();
        info!(venues = self.latest.len(), "rotation schedule rebuilt");
    }

    /// Earliest pending due time.
    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(due)| due.due_at)
    }

    /// Number of queued entries, including stale duplicates.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.heap.len()
    }

    /// Fire every entry due at the current clock reading.
    ///
    /// Returns how many ticks reached the manager.
    pub async fn run_due(&mut self) -> usize {
        self.drain_inbox();
        let now = self.clock.utc();
        let mut fired = 0;

        while let Some(Reverse(due)) = self.heap.peek().copied() {
            if due.due_at > now {
                break;
            }
            self.heap.pop();
            if self.is_stale(&due) {
                continue;
            }
            fired += 1;
            self.fire(due, now).await;
            self.drain_inbox();
        }
        fired
    }

    /// Run until the task is aborted.
    pub async fn run(mut self) {
        self.rebuild().await;
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        resync.tick().await;

        loop {
            let wait = self.until_next_due();
            tokio::select! {
                received = self.inbox.rx.recv() => match received {
                    Some(due) => self.push(due),
                    None => return,
                },
                () = tokio::time::sleep(wait) => {
                    self.run_due().await;
                }
                _ = resync.tick() => self.rebuild().await,
            }
        }
    }

    async fn fire(&mut self, due: DueRotation, now: DateTime<Utc>) {
        match self
            .manager
            .scheduled_tick(due.venue_id, due.epoch_sequence)
            .await
        {
            Ok(TickOutcome::Rotated(epoch)) => {
                debug!(venue_id = %due.venue_id, epoch_sequence = %epoch.epoch_sequence, "scheduled rotation done");
            }
            Ok(TickOutcome::AlreadyAdvanced(active)) => {
                debug!(venue_id = %due.venue_id, %active, "scheduled rotation superseded");
                if self.latest.get(&due.venue_id) == Some(&due) {
                    self.latest.remove(&due.venue_id);
                }
            }
            Ok(TickOutcome::NotDue(at)) => self.push(DueRotation { due_at: at, ..due }),
            Ok(TickOutcome::VenueInactive) => {
                self.latest.remove(&due.venue_id);
            }
            Err(error) => {
                warn!(venue_id = %due.venue_id, %error, "scheduled rotation failed; will retry");
                let retry_in = TimeDelta::from_std(self.config.stall_retry_interval)
                    .unwrap_or(TimeDelta::seconds(30));
                self.push(DueRotation {
                    due_at: now + retry_in,
                    ..due
                });
            }
        }
    }

    fn push(&mut self, due: DueRotation) {
        match self.latest.get(&due.venue_id) {
            Some(latest) if *latest == due => return,
            Some(latest) if latest.epoch_sequence > due.epoch_sequence => return,
            _ => {}
        }
        self.latest.insert(due.venue_id, due);
        self.heap.push(Reverse(due));
    }

    /// Entries replaced by a later push for the same venue are skipped.
    fn is_stale(&self, due: &DueRotation) -> bool {
        self.latest.get(&due.venue_id) != Some(due)
    }

    fn drain_inbox(&mut self) {
        while let Ok(due) = self.inbox.rx.try_recv() {
            self.push(due);
        }
    }

    fn until_next_due(&self) -> Duration {
        self.next_due().map_or(self.config.resync_interval, |due_at| {
            (due_at - self.clock.utc())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

#[cfg(test)]
#[path = "rotation_scheduler_tests.rs"]
mod tests;
