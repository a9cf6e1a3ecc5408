//! Live presence counters for a venue.
//!
//! ```text
//! GET /api/v1/venues/{venue_id}/presence
//! ```

use actix_web::{get, web};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::PresenceCounters;
use crate::inbound::http::ApiResult;
use crate::inbound::http::schemas::ErrorSchema;
use crate::inbound::http::state::HttpState;
use crate::inbound::http::validation::parse_venue_id;

/// Presence figures for one venue.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    /// Venue the figures describe.
    #[schema(format = "uuid")]
    pub venue_id: String,
    /// Open sessions seen within the idle threshold.
    pub active_visitors: u64,
    /// Distinct visitors ever admitted.
    pub total_visitors: u64,
    /// Mean stay of sessions closed in the trailing window, in seconds.
    pub average_stay_seconds: Option<i64>,
    /// Sessions closed in the trailing window.
    pub closed_in_window: u64,
}

impl From<PresenceCounters> for PresenceResponse {
    fn from(value: PresenceCounters) -> Self {
        Self {
            venue_id: value.venue_id.to_string(),
            active_visitors: value.active_visitors,
            total_visitors: value.total_visitors,
            average_stay_seconds: value.average_stay.map(|stay| stay.num_seconds()),
            closed_in_window: value.closed_in_window,
        }
    }
}

/// Counters for a venue; unknown venues report zeros.
#[utoipa::path(
    get,
    path = "/api/v1/venues/{venue_id}/presence",
    params(("venue_id" = String, Path, format = "uuid", description = "Venue identifier")),
    responses(
        (status = 200, description = "Presence counters", body = PresenceResponse),
        (status = 400, description = "Invalid venue id", body = ErrorSchema)
    ),
    tags = ["presence"],
    operation_id = "getPresence"
)]
#[get("/venues/{venue_id}/presence")]
pub async fn presence(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<PresenceResponse>> {
    let venue_id = parse_venue_id(&path.into_inner())?;
    let counters = state.presence.counters(venue_id).await;
    Ok(web::Json(counters.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test as actix_test};
    use rstest::rstest;

    use crate::domain::{RotationFrequency, VisitorId};
    use crate::inbound::http::test_utils::harness_state;
    use crate::test_support::at;
    use crate::test_support::harness::GatewayHarness;

    #[rstest]
    #[actix_web::test]
    async fn counters_reflect_scans_and_leaves() {
        let harness = GatewayHarness::new(at(20, 0));
        let venue = harness.add_venue(RotationFrequency::Daily);
        let epoch = harness.manager.current_epoch(venue).await.expect("activate");
        let mut sessions = Vec::new();
        for _ in 0..3 {
            let scan = harness
                .resolver
                .scan(venue, epoch.token_value.as_str(), VisitorId::random())
                .await
                .expect("admitted");
            sessions.push(scan.session.id);
        }
        harness.clock.set(at(20, 5));
        harness.presence.leave(sessions[0]).await.expect("leave");

        let app = actix_test::init_service(
            App::new()
                .app_data(harness_state(&harness))
                .service(web::scope("/api/v1").service(presence)),
        )
        .await;
        let response = actix_test::call_service(
            &app,
            actix_test::TestRequest::get()
                .uri(&format!("/api/v1/venues/{venue}/presence"))
                .to_request(),
        )
        .await;
        let body: PresenceResponse = actix_test::read_body_json(response).await;

        assert_eq!(body.active_visitors, 2);
        assert_eq!(body.total_visitors, 3);
        assert_eq!(body.average_stay_seconds, Some(300));
        assert_eq!(body.closed_in_window, 1);
    }
}
