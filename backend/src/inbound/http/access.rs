//! Scan endpoints: a visitor presents a venue code and is admitted.
//!
//! ```text
//! POST /api/v1/venues/{venue_id}/scan   {"token": "042917"}
//! POST /api/v1/scan                     {"payload": "https://…/v/{venue}?t=042917"}
//! ```
//!
//! Both require the visitor credential as `Authorization: Bearer …`. A
//! successful scan also records the session in the cookie session.

use actix_web::{HttpRequest, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::domain::{AccessPayload, Error, ScanOutcome, VenueId, VisitorId};
use crate::inbound::http::ApiResult;
use crate::inbound::http::schemas::ErrorSchema;
use crate::inbound::http::session::SessionContext;
use crate::inbound::http::state::HttpState;
use crate::inbound::http::validation::{
    FieldName, bearer_credential, parse_venue_id, require_text,
};

/// Scan of a code typed or decoded for a known venue.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Six-digit code shown on the venue display.
    #[schema(example = "042917")]
    pub token: Option<String>,
}

/// Scan of a raw QR payload URL.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayloadScanRequest {
    /// Full URL decoded from the QR code.
    #[schema(example = "https://gate.example/v/6f1c1a8e-2f4e-4b47-9a6f-0c8b7a0f6f10?t=042917")]
    pub payload: Option<String>,
}

/// Admission result.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    /// Session the visitor now holds.
    #[schema(format = "uuid")]
    pub session_id: String,
    /// Venue the session belongs to.
    #[schema(format = "uuid")]
    pub venue_id: String,
    /// Epoch the visitor joined under.
    pub epoch_sequence: u64,
    /// Time the session was opened.
    pub joined_at: DateTime<Utc>,
    /// `true` when a repeat scan returned the visitor's existing session.
    pub debounced: bool,
}

impl From<ScanOutcome> for ScanResponse {
    fn from(value: ScanOutcome) -> Self {
        Self {
            session_id: value.session.id.to_string(),
            venue_id: value.session.venue_id.to_string(),
            epoch_sequence: value.session.epoch_sequence_joined.get(),
            joined_at: value.session.joined_at,
            debounced: value.debounced,
        }
    }
}

pub(crate) fn require_visitor(state: &HttpState, req: &HttpRequest) -> Result<VisitorId, Error> {
    let credential = bearer_credential(req)
        .ok_or_else(|| Error::unauthorized("visitor credential required"))?;
    state.gateway.authenticate(&credential).map_err(Error::from)
}

async fn admit(
    state: &HttpState,
    session: &SessionContext,
    visitor: VisitorId,
    venue_id: VenueId,
    token: &str,
) -> ApiResult<ScanResponse> {
    let outcome = state
        .resolver
        .scan(venue_id, token, visitor)
        .await
        .map_err(Error::from)?;
    session.remember_visit(venue_id, outcome.session.id)?;
    Ok(outcome.into())
}

/// Validate a venue code and open (or return) the visitor's session.
#[utoipa::path(
    post,
    path = "/api/v1/venues/{venue_id}/scan",
    params(("venue_id" = String, Path, format = "uuid", description = "Venue identifier")),
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Visitor admitted", body = ScanResponse),
        (status = 400, description = "Invalid request", body = ErrorSchema),
        (status = 401, description = "Missing or refused visitor credential", body = ErrorSchema),
        (status = 403, description = "Code expired or venue inactive", body = ErrorSchema),
        (status = 404, description = "Unknown venue", body = ErrorSchema),
        (status = 503, description = "Service unavailable", body = ErrorSchema)
    ),
    tags = ["access"],
    operation_id = "scanVenueCode",
    security(("VisitorCredential" = []))
)]
#[post("/venues/{venue_id}/scan")]
pub async fn scan(
    state: web::Data<HttpState>,
    session: SessionContext,
    req: HttpRequest,
    path: web::Path<String>,
    payload: web::Json<ScanRequest>,
) -> ApiResult<web::Json<ScanResponse>> {
    let visitor = require_visitor(&state, &req)?;
    let venue_id = parse_venue_id(&path.into_inner())?;
    let token = require_text(payload.into_inner().token, FieldName::new("token"))?;
    admit(&state, &session, visitor, venue_id, &token)
        .await
        .map(web::Json)
}

/// Decode a QR payload URL and admit the visitor.
#[utoipa::path(
    post,
    path = "/api/v1/scan",
    request_body = PayloadScanRequest,
    responses(
        (status = 200, description = "Visitor admitted", body = ScanResponse),
        (status = 400, description = "Payload is not a venue code", body = ErrorSchema),
        (status = 401, description = "Missing or refused visitor credential", body = ErrorSchema),
        (status = 403, description = "Code expired or venue inactive", body = ErrorSchema),
        (status = 404, description = "Unknown venue", body = ErrorSchema),
        (status = 503, description = "Service unavailable", body = ErrorSchema)
    ),
    tags = ["access"],
    operation_id = "scanPayload",
    security(("VisitorCredential" = []))
)]
#[post("/scan")]
pub async fn scan_payload(
    state: web::Data<HttpState>,
    session: SessionContext,
    req: HttpRequest,
    payload: web::Json<PayloadScanRequest>,
) -> ApiResult<web::Json<ScanResponse>> {
    let visitor = require_visitor(&state, &req)?;
    let raw = require_text(payload.into_inner().payload, FieldName::new("payload"))?;
    let decoded = AccessPayload::parse(&raw).map_err(|error| {
        Error::invalid_request(error.to_string()).with_details(json!({
            "field": "payload",
            "code": "invalid_payload",
        }))
    })?;
    admit(
        &state,
        &session,
        visitor,
        decoded.venue_id,
        decoded.token.as_str(),
    )
    .await
    .map(web::Json)
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;
