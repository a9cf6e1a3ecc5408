//! Tests for the scan endpoints.

use super::*;
use actix_web::http::StatusCode;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{App, test as actix_test};
use rstest::{fixture, rstest};
use serde_json::Value;

use crate::domain::{RESCAN_MESSAGE, RotationFrequency, TokenEpoch};
use crate::inbound::http::test_utils::{harness_state, test_session_middleware};
use crate::test_support::at;
use crate::test_support::harness::GatewayHarness;

struct Venue {
    harness: GatewayHarness,
    venue: VenueId,
    epoch: TokenEpoch,
    visitor: VisitorId,
}

#[fixture]
async fn venue() -> Venue {
    let harness = GatewayHarness::new(at(9, 0));
    let venue = harness.add_venue(RotationFrequency::Hourly);
    let epoch = harness.manager.current_epoch(venue).await.expect("activate");
    Venue {
        harness,
        venue,
        epoch,
        visitor: VisitorId::random(),
    }
}

async fn post(
    harness: &GatewayHarness,
    uri: &str,
    credential: Option<String>,
    body: Value,
) -> actix_web::dev::ServiceResponse {
    let app = actix_test::init_service(
        App::new()
            .app_data(harness_state(harness))
            .wrap(test_session_middleware())
            .service(web::scope("/api/v1").service(scan).service(scan_payload)),
    )
    .await;
    let mut request = actix_test::TestRequest::post().uri(uri).set_json(body);
    if let Some(credential) = credential {
        request = request.insert_header((AUTHORIZATION, format!("Bearer {credential}")));
    }
    actix_test::call_service(&app, request.to_request()).await
}

#[rstest]
#[actix_web::test]
async fn scan_admits_the_visitor_and_sets_the_cookie(#[future] venue: Venue) {
    let Venue {
        harness,
        venue,
        epoch,
        visitor,
    } = venue.await;

    let response = post(
        &harness,
        &format!("/api/v1/venues/{venue}/scan"),
        Some(visitor.to_string()),
        serde_json::json!({"token": epoch.token_value.as_str()}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .response()
            .cookies()
            .any(|cookie| cookie.name() == "session")
    );
    let body: ScanResponse = actix_test::read_body_json(response).await;
    assert_eq!(body.venue_id, venue.to_string());
    assert_eq!(body.epoch_sequence, 1);
    assert!(!body.debounced);
    assert_eq!(harness.presence.counters(venue).await.active_visitors, 1);
}

#[rstest]
#[actix_web::test]
async fn repeat_scan_is_debounced(#[future] venue: Venue) {
    let Venue {
        harness,
        venue,
        epoch,
        visitor,
    } = venue.await;
    let uri = format!("/api/v1/venues/{venue}/scan");
    let body = serde_json::json!({"token": epoch.token_value.as_str()});

    let first: ScanResponse = actix_test::read_body_json(
        post(&harness, &uri, Some(visitor.to_string()), body.clone()).await,
    )
    .await;
    let second: ScanResponse =
        actix_test::read_body_json(post(&harness, &uri, Some(visitor.to_string()), body).await)
            .await;

    assert!(second.debounced);
    assert_eq!(first.session_id, second.session_id);
}

#[rstest]
#[actix_web::test]
async fn expired_code_asks_for_a_rescan(#[future] venue: Venue) {
    let Venue {
        harness,
        venue,
        epoch,
        visitor,
    } = venue.await;
    harness.clock.set(at(10, 1));

    let response = post(
        &harness,
        &format!("/api/v1/venues/{venue}/scan"),
        Some(visitor.to_string()),
        serde_json::json!({"token": epoch.token_value.as_str()}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["message"], RESCAN_MESSAGE);
}

#[rstest]
#[case::no_credential(None, StatusCode::UNAUTHORIZED)]
#[case::refused_credential(Some("not-a-visitor".to_owned()), StatusCode::UNAUTHORIZED)]
#[actix_web::test]
async fn scan_requires_a_visitor_credential(
    #[future] venue: Venue,
    #[case] credential: Option<String>,
    #[case] status: StatusCode,
) {
    let Venue {
        harness,
        venue,
        epoch,
        ..
    } = venue.await;

    let response = post(
        &harness,
        &format!("/api/v1/venues/{venue}/scan"),
        credential,
        serde_json::json!({"token": epoch.token_value.as_str()}),
    )
    .await;

    assert_eq!(response.status(), status);
    assert_eq!(harness.presence.counters(venue).await.active_visitors, 0);
}

#[rstest]
#[actix_web::test]
async fn missing_token_is_a_bad_request(#[future] venue: Venue) {
    let Venue {
        harness,
        venue,
        visitor,
        ..
    } = venue.await;

    let response = post(
        &harness,
        &format!("/api/v1/venues/{venue}/scan"),
        Some(visitor.to_string()),
        serde_json::json!({}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["details"]["field"], "token");
}

#[rstest]
#[actix_web::test]
async fn qr_payload_scan_admits_the_visitor(#[future] venue: Venue) {
    let Venue {
        harness,
        venue,
        epoch,
        visitor,
    } = venue.await;
    let base = url::Url::parse("https://gate.example/").expect("base");
    let payload = AccessPayload {
        venue_id: venue,
        token: epoch.token_value.clone(),
    }
    .to_url(&base)
    .expect("render");

    let response = post(
        &harness,
        "/api/v1/scan",
        Some(visitor.to_string()),
        serde_json::json!({"payload": payload.as_str()}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: ScanResponse = actix_test::read_body_json(response).await;
    assert_eq!(body.venue_id, venue.to_string());
}

#[rstest]
#[actix_web::test]
async fn malformed_payload_is_a_bad_request(#[future] venue: Venue) {
    let Venue {
        harness, visitor, ..
    } = venue.await;

    let response = post(
        &harness,
        "/api/v1/scan",
        Some(visitor.to_string()),
        serde_json::json!({"payload": "https://gate.example/menu"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["details"]["code"], "invalid_payload");
}
