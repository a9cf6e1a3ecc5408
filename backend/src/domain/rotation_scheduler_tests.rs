//! Rotation scheduler driven by a hand-moved clock.

use rstest::{fixture, rstest};

use super::*;
use crate::domain::RotationFrequency;
use crate::test_support::at;
use crate::test_support::harness::GatewayHarness;

#[fixture]
fn harness() -> GatewayHarness {
    GatewayHarness::new(at(9, 0))
}

#[rstest]
#[tokio::test]
async fn rebuild_schedules_every_active_venue(mut harness: GatewayHarness) {
    harness.add_venue(RotationFrequency::Hourly);
    harness.add_venue(RotationFrequency::Daily);

    harness.scheduler.rebuild().await;

    assert_eq!(harness.scheduler.next_due(), Some(at(10, 0)));
    assert_eq!(harness.scheduler.run_due().await, 0);
}

#[rstest]
#[tokio::test]
async fn due_epochs_rotate_once(mut harness: GatewayHarness) {
    let venue = harness.add_venue(RotationFrequency::Hourly);
    harness.scheduler.rebuild().await;
    harness.clock.set(at(10, 0));

    assert_eq!(harness.scheduler.run_due().await, 1);
    assert_eq!(harness.scheduler.run_due().await, 0);

    let current = harness.manager.current_epoch(venue).await.expect("epoch");
    assert_eq!(current.epoch_sequence, EpochSequence::new(2));
    assert_eq!(harness.scheduler.next_due(), Some(at(11, 0)));
}

#[rstest]
#[tokio::test]
async fn late_scheduler_catches_up_one_rotation_at_a_time(mut harness: GatewayHarness) {
    let venue = harness.add_venue(RotationFrequency::Hourly);
    harness.scheduler.rebuild().await;
    harness.clock.set(at(12, 30));

    harness.scheduler.run_due().await;

    // The replacement epoch starts at 12:30, so nothing else is due yet.
    let history = harness.epoch_store.history(&venue);
    assert_eq!(history.len(), 2);
    assert_eq!(harness.scheduler.next_due(), Some(at(13, 30)));
}

#[rstest]
#[tokio::test]
async fn manual_rotation_replaces_the_pending_entry(mut harness: GatewayHarness) {
    let venue = harness.add_venue(RotationFrequency::Hourly);
    harness.scheduler.rebuild().await;
    harness.clock.set(at(9, 10));
    harness.manager.rotate_now(venue).await.expect("rotate");

    harness.clock.set(at(10, 0));
    assert_eq!(harness.scheduler.run_due().await, 0);
    assert_eq!(harness.scheduler.next_due(), Some(at(10, 10)));

    harness.clock.set(at(10, 10));
    assert_eq!(harness.scheduler.run_due().await, 1);
    let current = harness.manager.current_epoch(venue).await.expect("epoch");
    assert_eq!(current.epoch_sequence, EpochSequence::new(3));
}

#[rstest]
#[tokio::test]
async fn failed_rotation_is_retried_later(mut harness: GatewayHarness) {
    let venue = harness.add_venue(RotationFrequency::Hourly);
    harness.scheduler.rebuild().await;
    harness.clock.set(at(10, 0));
    harness.tokens.fail_next(4);

    assert_eq!(harness.scheduler.run_due().await, 1);
    assert!(harness.manager.peek(venue).expect("published").rotation_stalled);
    assert_eq!(
        harness.scheduler.next_due(),
        Some(at(10, 0) + TimeDelta::seconds(30))
    );

    harness.clock.advance(TimeDelta::seconds(30));
    assert_eq!(harness.scheduler.run_due().await, 1);
    let snapshot = harness.manager.peek(venue).expect("published");
    assert!(!snapshot.rotation_stalled);
    assert_eq!(snapshot.current.epoch_sequence, EpochSequence::new(2));
}

#[rstest]
#[tokio::test]
async fn deactivated_venue_drops_out(mut harness: GatewayHarness) {
    let venue = harness.add_venue(RotationFrequency::Hourly);
    harness.scheduler.rebuild().await;
    assert!(harness.venues.set_active(venue, false));
    harness.clock.set(at(10, 0));

    assert_eq!(harness.scheduler.run_due().await, 1);
    assert_eq!(harness.epoch_store.history(&venue).len(), 1);
    assert_eq!(harness.scheduler.next_due(), None);
}

#[rstest]
fn due_rotations_order_by_time_first() {
    let early = DueRotation {
        due_at: at(9, 0),
        venue_id: VenueId::random(),
        epoch_sequence: EpochSequence::new(9),
    };
    let late = DueRotation {
        due_at: at(10, 0),
        venue_id: VenueId::random(),
        epoch_sequence: EpochSequence::FIRST,
    };
    let mut heap = BinaryHeap::from([Reverse(late), Reverse(early)]);

    assert_eq!(heap.pop(), Some(Reverse(early)));
}
