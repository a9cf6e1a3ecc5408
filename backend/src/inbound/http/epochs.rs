//! Venue access-code endpoints used by venue displays and staff.
//!
//! ```text
//! GET  /api/v1/venues/{venue_id}/epoch
//! POST /api/v1/venues/{venue_id}/epoch/rotate
//! ```
//!
//! These routes carry no credential check of their own: the current code is
//! the secret that admits visitors. Deployments must expose them only behind
//! an upstream gateway that restricts them to venue displays and staff.

use actix_web::{get, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::domain::{AccessPayload, EpochSnapshot, Error, TokenEpoch};
use crate::inbound::http::ApiResult;
use crate::inbound::http::schemas::ErrorSchema;
use crate::inbound::http::state::HttpState;
use crate::inbound::http::validation::parse_venue_id;

/// The code a venue should display right now.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EpochResponse {
    /// Venue the code belongs to.
    #[schema(format = "uuid")]
    pub venue_id: String,
    /// Digits encoded in the QR code.
    #[schema(example = "042917")]
    pub token: String,
    /// Monotonic epoch number for the venue.
    pub epoch_sequence: u64,
    /// Time the code was generated.
    pub generated_at: DateTime<Utc>,
    /// Time the code stops being current.
    pub expires_at: DateTime<Utc>,
    /// Whole seconds until `expiresAt`, floored at zero.
    pub seconds_remaining: u64,
    /// Set while rotation keeps failing; the code stays valid a little longer.
    pub rotation_stalled: bool,
    /// Full QR payload URL, when a public base URL is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_url: Option<String>,
}

impl EpochResponse {
    fn build(state: &HttpState, epoch: TokenEpoch, rotation_stalled: bool) -> Self {
        let qr_url = state.qr_base.as_ref().and_then(|base| {
            let payload = AccessPayload {
                venue_id: epoch.venue_id,
                token: epoch.token_value.clone(),
            };
            payload
                .to_url(base)
                .map_err(|error| warn!(%error, venue_id = %epoch.venue_id, "qr url not rendered"))
                .ok()
                .map(String::from)
        });
        Self {
            venue_id: epoch.venue_id.to_string(),
            seconds_remaining: epoch.seconds_remaining(state.clock.utc()),
            token: epoch.token_value.as_str().to_owned(),
            epoch_sequence: epoch.epoch_sequence.get(),
            generated_at: epoch.generated_at,
            expires_at: epoch.expires_at,
            rotation_stalled,
            qr_url,
        }
    }

    fn from_snapshot(state: &HttpState, snapshot: EpochSnapshot) -> Self {
        Self::build(state, snapshot.current, snapshot.rotation_stalled)
    }
}

/// Current access code for a venue; activates the venue on first read.
///
/// The response contains the live code. Serve it only to venue displays and
/// staff through an upstream gateway.
#[utoipa::path(
    get,
    path = "/api/v1/venues/{venue_id}/epoch",
    params(("venue_id" = String, Path, format = "uuid", description = "Venue identifier")),
    responses(
        (status = 200, description = "Active epoch", body = EpochResponse),
        (status = 400, description = "Invalid venue id", body = ErrorSchema),
        (status = 403, description = "Venue inactive", body = ErrorSchema),
        (status = 404, description = "Unknown venue", body = ErrorSchema),
        (status = 503, description = "Rotation state unavailable", body = ErrorSchema)
    ),
    tags = ["epochs"],
    operation_id = "getCurrentEpoch"
)]
#[get("/venues/{venue_id}/epoch")]
pub async fn current_epoch(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<EpochResponse>> {
    let venue_id = parse_venue_id(&path.into_inner())?;
    let snapshot = state.epochs.snapshot(venue_id).await.map_err(Error::from)?;
    Ok(web::Json(EpochResponse::from_snapshot(&state, snapshot)))
}

/// Supersede the venue's code immediately.
///
/// Unguarded here; an upstream gateway must restrict it to venue staff.
#[utoipa::path(
    post,
    path = "/api/v1/venues/{venue_id}/epoch/rotate",
    params(("venue_id" = String, Path, format = "uuid", description = "Venue identifier")),
    responses(
        (status = 200, description = "New active epoch", body = EpochResponse),
        (status = 400, description = "Invalid venue id", body = ErrorSchema),
        (status = 403, description = "Venue inactive", body = ErrorSchema),
        (status = 404, description = "Unknown venue", body = ErrorSchema),
        (status = 503, description = "Rotation stalled or busy", body = ErrorSchema)
    ),
    tags = ["epochs"],
    operation_id = "rotateEpoch"
)]
#[post("/venues/{venue_id}/epoch/rotate")]
pub async fn rotate_epoch(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<EpochResponse>> {
    let venue_id = parse_venue_id(&path.into_inner())?;
    let epoch = state.epochs.rotate_now(venue_id).await.map_err(Error::from)?;
    info!(%venue_id, epoch_sequence = %epoch.epoch_sequence, "manual rotation requested");
    Ok(web::Json(EpochResponse::build(&state, epoch, false)))
}

#[cfg(test)]
#[path = "epochs_tests.rs"]
mod tests;
