//! Access resolver scenarios on an hourly venue opened at 09:00.

use rstest::{fixture, rstest};

use super::*;
use crate::domain::{ErrorCode, RotationFrequency};
use crate::test_support::at;
use crate::test_support::harness::GatewayHarness;

struct Venue9am {
    harness: GatewayHarness,
    venue: VenueId,
    t1: TokenEpoch,
}

#[fixture]
async fn opened() -> Venue9am {
    let harness = GatewayHarness::new(at(9, 0));
    let venue = harness.add_venue(RotationFrequency::Hourly);
    let t1 = harness.manager.current_epoch(venue).await.expect("activate");
    Venue9am { harness, venue, t1 }
}

#[rstest]
#[tokio::test]
async fn current_token_is_valid_inside_its_window(#[future] opened: Venue9am) {
    let Venue9am { harness, venue, t1 } = opened.await;
    harness.clock.set(at(9, 30));

    let epoch = harness
        .resolver
        .validate(venue, t1.token_value.as_str())
        .await
        .expect("valid");

    assert_eq!(epoch, t1);
}

#[rstest]
#[tokio::test]
async fn token_is_expired_after_scheduled_rotation(#[future] opened: Venue9am) {
    let Venue9am {
        mut harness,
        venue,
        t1,
    } = opened.await;
    harness.scheduler.rebuild().await;
    harness.clock.set(at(10, 0));
    harness.scheduler.run_due().await;
    harness.clock.set(at(10, 1));

    let denied = harness
        .resolver
        .validate(venue, t1.token_value.as_str())
        .await;

    assert_eq!(denied, Err(AccessDenied::TokenExpired));
}

#[rstest]
#[tokio::test]
async fn token_is_mismatched_after_manual_rotation(#[future] opened: Venue9am) {
    let Venue9am { harness, venue, t1 } = opened.await;
    harness.clock.set(at(9, 10));
    let t3 = harness.manager.rotate_now(venue).await.expect("rotate");
    harness.clock.set(at(9, 12));

    let denied = harness
        .resolver
        .validate(venue, t1.token_value.as_str())
        .await;

    assert_eq!(t3.epoch_sequence, t1.epoch_sequence.next());
    assert_eq!(t3.expires_at, at(10, 10));
    assert_eq!(denied, Err(AccessDenied::TokenMismatch));
    assert!(
        harness
            .resolver
            .validate(venue, t3.token_value.as_str())
            .await
            .is_ok()
    );
}

#[rstest]
#[tokio::test]
async fn unknown_code_is_a_mismatch(#[future] opened: Venue9am) {
    let Venue9am { harness, venue, .. } = opened.await;

    for presented in ["999999", "", "12ab56", "0000001"] {
        assert_eq!(
            harness.resolver.validate(venue, presented).await,
            Err(AccessDenied::TokenMismatch),
            "{presented:?}"
        );
    }
}

#[rstest]
#[tokio::test]
async fn current_token_past_expiry_is_expired(#[future] opened: Venue9am) {
    let Venue9am { harness, venue, t1 } = opened.await;
    harness.clock.set(at(10, 1));

    assert_eq!(
        harness
            .resolver
            .validate(venue, t1.token_value.as_str())
            .await,
        Err(AccessDenied::TokenExpired)
    );
}

#[rstest]
#[tokio::test]
async fn stalled_rotation_opens_the_grace_window(#[future] opened: Venue9am) {
    let Venue9am { harness, venue, t1 } = opened.await;
    harness.clock.set(at(10, 0));
    harness.tokens.fail_next(4);
    harness
        .manager
        .scheduled_tick(venue, t1.epoch_sequence)
        .await
        .expect_err("rotation stalls");

    harness.clock.set(at(10, 4));
    let within = harness
        .resolver
        .validate(venue, t1.token_value.as_str())
        .await;
    harness.clock.set(at(10, 6));
    let beyond = harness
        .resolver
        .validate(venue, t1.token_value.as_str())
        .await;

    assert_eq!(within, Ok(t1));
    assert_eq!(beyond, Err(AccessDenied::TokenExpired));
}

#[rstest]
#[tokio::test]
async fn inactive_venue_is_refused(#[future] opened: Venue9am) {
    let Venue9am { harness, venue, t1 } = opened.await;
    assert!(harness.venues.set_active(venue, false));

    assert_eq!(
        harness
            .resolver
            .validate(venue, t1.token_value.as_str())
            .await,
        Err(AccessDenied::VenueInactive(venue))
    );
    let unknown = VenueId::random();
    assert_eq!(
        harness.resolver.validate(unknown, "123456").await,
        Err(AccessDenied::VenueNotFound(unknown))
    );
}

#[rstest]
#[tokio::test]
async fn scan_opens_and_debounces_sessions(#[future] opened: Venue9am) {
    let Venue9am { harness, venue, t1 } = opened.await;
    let visitor = VisitorId::random();

    let first = harness
        .resolver
        .scan(venue, t1.token_value.as_str(), visitor)
        .await
        .expect("admitted");
    let repeat = harness
        .resolver
        .scan(venue, t1.token_value.as_str(), visitor)
        .await
        .expect("admitted");

    assert!(!first.debounced);
    assert!(repeat.debounced);
    assert_eq!(first.session.id, repeat.session.id);
    assert_eq!(first.session.epoch_sequence_joined, t1.epoch_sequence);
    assert_eq!(harness.presence.counters(venue).await.active_visitors, 1);
}

#[rstest]
#[tokio::test]
async fn session_under_superseded_epoch_is_refused(#[future] opened: Venue9am) {
    let Venue9am { harness, venue, t1 } = opened.await;
    harness.manager.rotate_now(venue).await.expect("rotate");

    let denied = harness
        .resolver
        .create_session(venue, VisitorId::random(), t1.epoch_sequence)
        .await;

    assert_eq!(
        denied,
        Err(AccessDenied::StaleEpoch {
            presented: EpochSequence::FIRST,
            active: EpochSequence::new(2),
        })
    );
    assert_eq!(harness.presence.counters(venue).await.active_visitors, 0);
}

#[rstest]
#[case(AccessDenied::TokenMismatch)]
#[case(AccessDenied::TokenExpired)]
fn token_refusals_look_the_same_to_visitors(#[case] denied: AccessDenied) {
    let err = Error::from(denied);
    assert_eq!(err.code(), ErrorCode::Forbidden);
    assert_eq!(err.message(), RESCAN_MESSAGE);
}

#[rstest]
#[tokio::test]
async fn directory_outage_is_reported_as_unavailable() {
    use crate::domain::ports::{MockVenueDirectory, NoOpGatewayMetrics, VenueDirectoryError};

    let harness = GatewayHarness::new(at(9, 0));
    let mut directory = MockVenueDirectory::new();
    directory
        .expect_find()
        .times(1)
        .returning(|_| Err(VenueDirectoryError::connection("directory offline")));
    let resolver = AccessResolver::new(
        Arc::new(directory),
        harness.manager.clone(),
        harness.presence.clone(),
        Arc::new(NoOpGatewayMetrics),
        harness.clock.clone(),
        AccessResolverConfig::default(),
    );

    let denied = resolver.validate(VenueId::random(), "000000").await;

    assert!(matches!(denied, Err(AccessDenied::Unavailable(_))));
    assert_eq!(
        Error::from(AccessDenied::Unavailable("x".to_owned())).code(),
        ErrorCode::ServiceUnavailable
    );
}
