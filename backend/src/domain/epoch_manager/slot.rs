//! Per-venue epoch slot: one writer lock plus a published snapshot.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, watch};

use crate::domain::EpochSnapshot;

/// Serialises mutations for one venue and publishes committed state.
///
/// Readers use [`EpochSlot::snapshot`] and never touch the writer lock.
pub(super) struct EpochSlot {
    writer: Mutex<()>,
    published: watch::Sender<Option<EpochSnapshot>>,
}

impl EpochSlot {
    pub(super) fn new() -> Self {
        let (published, _) = watch::channel(None);
        Self {
            writer: Mutex::new(()),
            published,
        }
    }

    /// Latest committed snapshot, if the venue has been loaded.
    pub(super) fn snapshot(&self) -> Option<EpochSnapshot> {
        self.published.borrow().clone()
    }

    /// Subscribe to committed snapshots.
    pub(super) fn subscribe(&self) -> watch::Receiver<Option<EpochSnapshot>> {
        self.published.subscribe()
    }

    /// Publish a new snapshot. Call only while holding the writer guard.
    pub(super) fn publish(&self, snapshot: EpochSnapshot) {
        self.published.send_replace(Some(snapshot));
    }

    /// Wait at most `timeout` for the writer lock.
    pub(super) async fn lock_writer(&self, timeout: Duration) -> Option<MutexGuard<'_, ()>> {
        tokio::time::timeout(timeout, self.writer.lock()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_writer_times_out_while_first_holds_lock() {
        let slot = EpochSlot::new();
        let held = slot
            .lock_writer(Duration::from_millis(10))
            .await
            .expect("first writer acquires");

        assert!(slot.lock_writer(Duration::from_millis(10)).await.is_none());
        drop(held);
        assert!(slot.lock_writer(Duration::from_millis(10)).await.is_some());
    }

    #[tokio::test]
    async fn snapshot_is_readable_while_writer_held() {
        let slot = EpochSlot::new();
        let _held = slot
            .lock_writer(Duration::from_millis(10))
            .await
            .expect("writer acquires");
        assert!(slot.snapshot().is_none());
    }
}
