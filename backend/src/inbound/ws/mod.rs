//! WebSocket inbound adapter for venue chat.
//!
//! ```text
//! GET /ws/venues/{venue_id}?session={session_id}
//! GET /ws/venues/{venue_id}?token=042917&credential=…
//! ```
//!
//! Responsibilities:
//! - validate upgrade requests (origin allow-list, visitor credential)
//! - resolve the visitor session that authorises chat
//! - hand the joined [`ChatConnection`](crate::domain::ChatConnection) to the
//!   per-socket loop in [`session`]

use std::sync::Arc;

use actix_web::http::header::{HeaderValue, ORIGIN};
use actix_web::web::{self, Payload};
use actix_web::{HttpRequest, HttpResponse, get};
use serde::Deserialize;
use tracing::{error, info, warn};
use url::Url;
use utoipa::IntoParams;

use crate::domain::{Error, VenueId, VisitorId, VisitorSessionId};
use crate::inbound::http::session::SessionContext;
use crate::inbound::http::state::HttpState;
use crate::inbound::http::validation::{
    FieldName, bearer_credential, missing_field_error, parse_session_id, parse_venue_id,
};

mod session;

pub mod messages;
pub mod state;

use state::AllowedOrigins;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConnectParams {
    /// Open visitor session to chat under.
    pub session: Option<String>,
    /// Current venue code; admits the visitor when no session is given.
    pub token: Option<String>,
    /// Visitor credential for clients that cannot set `Authorization`.
    pub credential: Option<String>,
}

/// Upgrade to the venue's chat socket.
#[utoipa::path(
    get,
    path = "/ws/venues/{venue_id}",
    params(
        ("venue_id" = String, Path, format = "uuid", description = "Venue identifier"),
        ConnectParams
    ),
    responses(
        (status = 101, description = "Switching protocols to the chat socket"),
        (status = 400, description = "Invalid request", body = crate::inbound::http::schemas::ErrorSchema),
        (status = 401, description = "Missing or refused visitor credential", body = crate::inbound::http::schemas::ErrorSchema),
        (status = 403, description = "Origin refused or session not open", body = crate::inbound::http::schemas::ErrorSchema),
        (status = 503, description = "Chat unavailable", body = crate::inbound::http::schemas::ErrorSchema)
    ),
    tags = ["chat"],
    operation_id = "connectChat",
    security(("VisitorCredential" = []))
)]
#[get("/ws/venues/{venue_id}")]
pub async fn ws_entry(
    state: web::Data<HttpState>,
    origins: web::Data<AllowedOrigins>,
    cookie: SessionContext,
    req: HttpRequest,
    path: web::Path<String>,
    params: web::Query<ConnectParams>,
    body: Payload,
) -> actix_web::Result<HttpResponse> {
    check_origin(&origins, &req)?;
    let venue_id = parse_venue_id(&path.into_inner())?;
    let params = params.into_inner();
    let credential = bearer_credential(&req)
        .or_else(|| {
            params
                .credential
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        })
        .ok_or_else(|| Error::unauthorized("visitor credential required"))?;
    let visitor = state
        .gateway
        .authenticate(&credential)
        .map_err(Error::from)?;
    let session_id = resolve_session(&state, &cookie, venue_id, visitor, &params).await?;
    let connection = state
        .gateway
        .connect(venue_id, session_id, &credential)
        .await
        .map_err(Error::from)?;

    let (response, socket, stream) = actix_ws::handle(&req, body).map_err(|error| {
        error!(error = %error, "WebSocket upgrade failed");
        error
    })?;
    info!(%venue_id, %session_id, connection_id = %connection.id(), "chat socket opened");
    actix_web::rt::spawn(session::run_chat_socket(
        connection,
        Arc::clone(&state.presence),
        socket,
        stream,
    ));
    Ok(response)
}

/// Session named in the query, opened by `token`, or remembered by the cookie.
async fn resolve_session(
    state: &HttpState,
    cookie: &SessionContext,
    venue_id: VenueId,
    visitor: VisitorId,
    params: &ConnectParams,
) -> Result<VisitorSessionId, Error> {
    if let Some(raw) = params.session.as_deref() {
        return parse_session_id(raw);
    }
    if let Some(token) = params
        .token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
    {
        let outcome = state
            .resolver
            .scan(venue_id, token, visitor)
            .await
            .map_err(Error::from)?;
        return Ok(outcome.session.id);
    }
    match cookie.visitor_session()? {
        Some((remembered_venue, session_id)) if remembered_venue == venue_id => Ok(session_id),
        _ => Err(missing_field_error(FieldName::new("session"))),
    }
}

fn check_origin(origins: &AllowedOrigins, req: &HttpRequest) -> Result<(), Error> {
    let mut headers = req.headers().get_all(ORIGIN);
    let header = headers.next().ok_or_else(|| {
        warn!("Missing Origin header on WebSocket upgrade");
        Error::forbidden("origin not allowed")
    })?;
    if headers.next().is_some() {
        warn!("Multiple Origin headers on WebSocket upgrade");
        return Err(Error::invalid_request("invalid Origin header"));
    }
    validate_origin(origins, header)
}

fn validate_origin(origins: &AllowedOrigins, header: &HeaderValue) -> Result<(), Error> {
    let value = header.to_str().map_err(|error| {
        warn!(error = %error, "Failed to parse Origin header as string");
        Error::invalid_request("invalid Origin header")
    })?;
    let origin = Url::parse(value).map_err(|error| {
        warn!(error = %error, "Failed to parse Origin header as URL");
        Error::invalid_request("invalid Origin header")
    })?;
    if origins.allows(&origin) {
        Ok(())
    } else {
        warn!(origin = value, "Rejected WS upgrade due to disallowed Origin");
        Err(Error::forbidden("origin not allowed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, test as actix_test};
    use rstest::rstest;
    use serde_json::Value;

    use crate::domain::{ErrorCode, RotationFrequency};
    use crate::inbound::http::test_utils::harness_state;
    use crate::test_support::at;
    use crate::test_support::harness::GatewayHarness;

    fn origins() -> AllowedOrigins {
        AllowedOrigins::new(["http://localhost:3000", "https://Gate.Example/"])
    }

    #[rstest]
    #[case("http://localhost:3000", true)]
    #[case("https://gate.example", true)]
    #[case("https://GATE.example", true)]
    #[case("http://localhost:4000", false)]
    #[case("http://gate.example", false)]
    #[case("https://chat.gate.example", false)]
    #[case("https://gate.example.evil.com", false)]
    fn evaluates_allow_list(#[case] origin: &str, #[case] expected: bool) {
        let header = HeaderValue::from_str(origin).expect("valid header value");
        assert_eq!(validate_origin(&origins(), &header).is_ok(), expected);
    }

    #[rstest]
    #[case::non_utf8(HeaderValue::from_bytes(&[0x80]).expect("opaque header value"))]
    #[case::not_a_url(HeaderValue::from_static("not a url"))]
    fn malformed_origin_is_a_bad_request(#[case] header: HeaderValue) {
        let error = validate_origin(&origins(), &header).expect_err("origin rejected");
        assert_eq!(error.code(), ErrorCode::InvalidRequest);
    }

    async fn upgrade(
        harness: &GatewayHarness,
        uri: &str,
        origin: Option<&str>,
        credential: Option<&str>,
    ) -> (StatusCode, Value) {
        let app = actix_test::init_service(
            App::new()
                .app_data(harness_state(harness))
                .app_data(web::Data::new(origins()))
                .service(ws_entry),
        )
        .await;
        let mut request = actix_test::TestRequest::get().uri(uri);
        if let Some(origin) = origin {
            request = request.insert_header((ORIGIN, origin));
        }
        if let Some(credential) = credential {
            request = request.insert_header(("Authorization", format!("Bearer {credential}")));
        }
        let response = actix_test::call_service(&app, request.to_request()).await;
        let status = response.status();
        (status, actix_test::read_body_json(response).await)
    }

    #[rstest]
    #[actix_web::test]
    async fn refuses_unlisted_origin_before_anything_else() {
        let harness = GatewayHarness::new(at(21, 0));
        let venue = harness.add_venue(RotationFrequency::Daily);

        let (status, body) = upgrade(
            &harness,
            &format!("/ws/venues/{venue}"),
            Some("https://evil.example"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "origin not allowed");
    }

    #[rstest]
    #[actix_web::test]
    async fn requires_a_visitor_credential() {
        let harness = GatewayHarness::new(at(21, 0));
        let venue = harness.add_venue(RotationFrequency::Daily);

        let (status, body) = upgrade(
            &harness,
            &format!("/ws/venues/{venue}?session={}", VisitorSessionId::random()),
            Some("http://localhost:3000"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");
    }

    #[rstest]
    #[actix_web::test]
    async fn refuses_sessions_that_are_not_open() {
        let harness = GatewayHarness::new(at(21, 0));
        let venue = harness.add_venue(RotationFrequency::Daily);
        let visitor = VisitorId::random().to_string();

        let (status, body) = upgrade(
            &harness,
            &format!("/ws/venues/{venue}?session={}", VisitorSessionId::random()),
            Some("http://localhost:3000"),
            Some(visitor.as_str()),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");
    }

    #[rstest]
    #[actix_web::test]
    async fn requires_a_session_or_token() {
        let harness = GatewayHarness::new(at(21, 0));
        let venue = harness.add_venue(RotationFrequency::Daily);
        let visitor = VisitorId::random().to_string();

        let (status, body) = upgrade(
            &harness,
            &format!("/ws/venues/{venue}?credential={visitor}"),
            Some("http://localhost:3000"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"]["field"], "session");
    }

    #[rstest]
    #[actix_web::test]
    async fn expired_token_asks_for_a_rescan() {
        let harness = GatewayHarness::new(at(21, 0));
        let venue = harness.add_venue(RotationFrequency::Daily);
        let visitor = VisitorId::random().to_string();

        let (status, body) = upgrade(
            &harness,
            &format!("/ws/venues/{venue}?token=000000"),
            Some("http://localhost:3000"),
            Some(visitor.as_str()),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], crate::domain::RESCAN_MESSAGE);
    }
}
