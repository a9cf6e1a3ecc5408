//! Presence tracker behaviour.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use rstest::{fixture, rstest};

use super::*;
use crate::domain::ports::{MockVisitorSessionRepository, VisitorSessionRepositoryError};
use crate::outbound::memory::InMemoryVisitorSessionRepository;
use crate::test_support::{MutableClock, RecordingEventSink, at};

struct Fixture {
    clock: Arc<MutableClock>,
    store: Arc<InMemoryVisitorSessionRepository>,
    events: Arc<RecordingEventSink>,
    tracker: PresenceTracker,
}

impl Fixture {
    fn tracker_over_same_store(&self) -> PresenceTracker {
        PresenceTracker::new(
            self.store.clone(),
            Arc::new(RecordingEventSink::default()),
            self.clock.clone(),
            PresenceConfig::default(),
        )
    }
}

#[fixture]
fn fixture() -> Fixture {
    let clock = Arc::new(MutableClock::new(at(9, 0)));
    let store = Arc::new(InMemoryVisitorSessionRepository::new());
    let events = Arc::new(RecordingEventSink::default());
    let tracker = PresenceTracker::new(
        store.clone(),
        events.clone(),
        clock.clone(),
        PresenceConfig::default(),
    );
    Fixture {
        clock,
        store,
        events,
        tracker,
    }
}

#[rstest]
#[tokio::test]
async fn opening_counts_active_and_total(fixture: Fixture) {
    let venue = VenueId::random();
    fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");
    fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");

    let counters = fixture.tracker.counters(venue).await;
    assert_eq!(counters.active_visitors, 2);
    assert_eq!(counters.total_visitors, 2);
    assert_eq!(counters.average_stay, None);
    assert_eq!(fixture.events.names(), vec!["session_opened", "session_opened"]);
}

#[rstest]
#[tokio::test]
async fn rescan_within_debounce_returns_existing_session(fixture: Fixture) {
    let venue = VenueId::random();
    let visitor = VisitorId::random();
    let first = fixture
        .tracker
        .open_session(venue, visitor, EpochSequence::FIRST)
        .await
        .expect("open");
    fixture.clock.advance(TimeDelta::seconds(10));

    let again = fixture
        .tracker
        .open_session(venue, visitor, EpochSequence::FIRST)
        .await
        .expect("open");

    assert!(again.debounced);
    assert_eq!(again.session.id, first.session.id);
    assert_eq!(fixture.tracker.counters(venue).await.active_visitors, 1);
}

#[rstest]
#[tokio::test]
async fn rescan_after_debounce_opens_new_session_without_new_visitor(fixture: Fixture) {
    let venue = VenueId::random();
    let visitor = VisitorId::random();
    let first = fixture
        .tracker
        .open_session(venue, visitor, EpochSequence::FIRST)
        .await
        .expect("open");
    fixture.clock.advance(TimeDelta::minutes(2));

    let again = fixture
        .tracker
        .open_session(venue, visitor, EpochSequence::FIRST)
        .await
        .expect("open");

    assert!(!again.debounced);
    assert_ne!(again.session.id, first.session.id);
    let counters = fixture.tracker.counters(venue).await;
    assert_eq!(counters.total_visitors, 1);
    assert_eq!(counters.active_visitors, 2);
}

#[rstest]
#[tokio::test]
async fn leave_decrements_exactly_once(fixture: Fixture) {
    let venue = VenueId::random();
    let opened = fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");
    fixture.clock.advance_minutes(30);

    let stay = fixture.tracker.leave(opened.session.id).await.expect("leave");
    assert_eq!(stay, TimeDelta::minutes(30));

    let second = fixture.tracker.leave(opened.session.id).await;
    assert_eq!(second, Err(PresenceError::SessionClosed(opened.session.id)));

    let counters = fixture.tracker.counters(venue).await;
    assert_eq!(counters.active_visitors, 0);
    assert_eq!(counters.average_stay, Some(TimeDelta::minutes(30)));
    assert_eq!(counters.closed_in_window, 1);
}

#[rstest]
#[tokio::test]
async fn unknown_session_is_not_found(fixture: Fixture) {
    let id = VisitorSessionId::random();
    assert_eq!(
        fixture.tracker.heartbeat(id).await,
        Err(PresenceError::SessionNotFound(id))
    );
}

#[rstest]
#[tokio::test]
async fn heartbeat_keeps_session_out_of_idle_sweep(fixture: Fixture) {
    let venue = VenueId::random();
    let kept = fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");
    let idle = fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");

    fixture.clock.advance_minutes(8);
    fixture.tracker.heartbeat(kept.session.id).await.expect("heartbeat");
    fixture.clock.advance_minutes(4);

    assert_eq!(fixture.tracker.counters(venue).await.active_visitors, 1);
    let report = fixture.tracker.sweep(|_| None).await;

    assert_eq!(report.idle_closed, 1);
    assert!(fixture.tracker.find_open(kept.session.id).await.is_some());
    assert!(fixture.tracker.find_open(idle.session.id).await.is_none());
    let stored = fixture
        .store
        .find(&idle.session.id)
        .await
        .expect("find")
        .expect("stored");
    assert_eq!(stored.close_reason, Some(SessionCloseReason::IdleTimeout));
}

#[rstest]
#[tokio::test]
async fn session_closes_after_two_rotations(fixture: Fixture) {
    let venue = VenueId::random();
    let opened = fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");

    let one_rotation = fixture
        .tracker
        .sweep(|_| Some(EpochSequence::new(2)))
        .await;
    assert_eq!(one_rotation.closed(), 0);

    let two_rotations = fixture
        .tracker
        .sweep(|_| Some(EpochSequence::new(3)))
        .await;
    assert_eq!(two_rotations.epoch_closed, 1);
    assert_eq!(
        fixture.tracker.leave(opened.session.id).await,
        Err(PresenceError::SessionClosed(opened.session.id))
    );
}

#[rstest]
#[tokio::test]
async fn hydrate_restores_counts_after_restart(fixture: Fixture) {
    let venue = VenueId::random();
    let stayed = fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");
    let left = fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");
    fixture.clock.advance_minutes(20);
    fixture.tracker.leave(left.session.id).await.expect("leave");

    let restarted = fixture.tracker_over_same_store();
    assert_eq!(restarted.hydrate().await.expect("hydrate"), 1);

    let counters = restarted.counters(venue).await;
    assert_eq!(counters.active_visitors, 1);
    assert_eq!(counters.total_visitors, 2);
    assert_eq!(counters.average_stay, Some(TimeDelta::minutes(20)));
    assert!(restarted.find_open(stayed.session.id).await.is_some());
}

#[rstest]
#[tokio::test]
async fn storage_failure_leaves_counters_untouched() {
    let mut store = MockVisitorSessionRepository::new();
    store
        .expect_insert()
        .returning(|_| Err(VisitorSessionRepositoryError::connection("database down")));
    let tracker = PresenceTracker::new(
        Arc::new(store),
        Arc::new(RecordingEventSink::default()),
        Arc::new(MutableClock::new(Utc::now())),
        PresenceConfig::default(),
    );
    let venue = VenueId::random();

    let result = tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await;

    assert!(matches!(result, Err(PresenceError::Storage(_))));
    let counters = tracker.counters(venue).await;
    assert_eq!(counters.active_visitors, 0);
    assert_eq!(counters.total_visitors, 0);
}

#[rstest]
#[tokio::test]
async fn concurrent_closes_have_one_winner(fixture: Fixture) {
    let venue = VenueId::random();
    let tracker = Arc::new(fixture.tracker);
    let opened = tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");

    let leave = {
        let tracker = Arc::clone(&tracker);
        let id = opened.session.id;
        tokio::spawn(async move { tracker.leave(id).await })
    };
    let idle = {
        let tracker = Arc::clone(&tracker);
        let id = opened.session.id;
        tokio::spawn(async move { tracker.close(id, SessionCloseReason::IdleTimeout).await })
    };
    let outcomes = [
        leave.await.expect("join leave"),
        idle.await.expect("join close"),
    ];

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert_eq!(tracker.counters(venue).await.active_visitors, 0);
    assert_eq!(
        fixture
            .events
            .names()
            .iter()
            .filter(|name| **name == "session_closed")
            .count(),
        1
    );
}

#[rstest]
#[tokio::test]
async fn closures_are_announced_to_subscribers(fixture: Fixture) {
    let venue = VenueId::random();
    let mut closures = fixture.tracker.subscribe_closures();
    let opened = fixture
        .tracker
        .open_session(venue, VisitorId::random(), EpochSequence::FIRST)
        .await
        .expect("open");

    fixture.tracker.leave(opened.session.id).await.expect("leave");
    let repeat = fixture.tracker.leave(opened.session.id).await;

    assert_eq!(
        closures.try_recv().expect("closure announced"),
        SessionClosure {
            venue_id: venue,
            session_id: opened.session.id,
            reason: SessionCloseReason::ExplicitLeave,
        }
    );
    assert!(repeat.is_err());
    assert!(closures.try_recv().is_err());
}
