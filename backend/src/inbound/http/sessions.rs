//! Visitor session endpoints.
//!
//! ```text
//! POST /api/v1/sessions/{session_id}/heartbeat
//! POST /api/v1/sessions/{session_id}/leave
//! ```
//!
//! Only the visitor who opened a session may touch it.

use actix_web::{HttpRequest, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::domain::{Error, VisitorId, VisitorSessionId};
use crate::inbound::http::ApiResult;
use crate::inbound::http::access::require_visitor;
use crate::inbound::http::schemas::ErrorSchema;
use crate::inbound::http::session::SessionContext;
use crate::inbound::http::state::HttpState;
use crate::inbound::http::validation::parse_session_id;

/// Heartbeat acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    /// Session that was refreshed.
    #[schema(format = "uuid")]
    pub session_id: String,
    /// New `lastSeenAt` recorded by presence.
    pub last_seen_at: DateTime<Utc>,
}

/// Leave acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {
    /// Session that was closed.
    #[schema(format = "uuid")]
    pub session_id: String,
    /// Length of the visit in whole seconds.
    pub stay_seconds: i64,
}

/// Refuse callers who do not own an open session.
///
/// Closed or unknown sessions fall through so the presence tracker reports
/// them with its own status.
async fn ensure_owner(
    state: &HttpState,
    session_id: VisitorSessionId,
    visitor: VisitorId,
) -> Result<(), Error> {
    match state.presence.find_open(session_id).await {
        Some(open) if open.visitor_id != visitor => {
            Err(Error::forbidden("session belongs to another visitor"))
        }
        _ => Ok(()),
    }
}

/// Keep a session counted as active.
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/heartbeat",
    params(("session_id" = String, Path, format = "uuid", description = "Visitor session identifier")),
    responses(
        (status = 200, description = "Heartbeat recorded", body = HeartbeatResponse),
        (status = 400, description = "Invalid session id", body = ErrorSchema),
        (status = 401, description = "Missing or refused visitor credential", body = ErrorSchema),
        (status = 403, description = "Session belongs to another visitor", body = ErrorSchema),
        (status = 404, description = "Unknown session", body = ErrorSchema),
        (status = 409, description = "Session already closed", body = ErrorSchema)
    ),
    tags = ["sessions"],
    operation_id = "heartbeatSession",
    security(("VisitorCredential" = []))
)]
#[post("/sessions/{session_id}/heartbeat")]
pub async fn heartbeat(
    state: web::Data<HttpState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<web::Json<HeartbeatResponse>> {
    let visitor = require_visitor(&state, &req)?;
    let session_id = parse_session_id(&path.into_inner())?;
    ensure_owner(&state, session_id, visitor).await?;
    let session = state
        .presence
        .heartbeat(session_id)
        .await
        .map_err(Error::from)?;
    Ok(web::Json(HeartbeatResponse {
        session_id: session.id.to_string(),
        last_seen_at: session.last_seen_at,
    }))
}

/// Close a session because the visitor left.
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/leave",
    params(("session_id" = String, Path, format = "uuid", description = "Visitor session identifier")),
    responses(
        (status = 200, description = "Session closed", body = LeaveResponse),
        (status = 400, description = "Invalid session id", body = ErrorSchema),
        (status = 401, description = "Missing or refused visitor credential", body = ErrorSchema),
        (status = 403, description = "Session belongs to another visitor", body = ErrorSchema),
        (status = 404, description = "Unknown session", body = ErrorSchema),
        (status = 409, description = "Session already closed", body = ErrorSchema),
        (status = 503, description = "Session storage unavailable", body = ErrorSchema)
    ),
    tags = ["sessions"],
    operation_id = "leaveSession",
    security(("VisitorCredential" = []))
)]
#[post("/sessions/{session_id}/leave")]
pub async fn leave(
    state: web::Data<HttpState>,
    session: SessionContext,
    req: HttpRequest,
    path: web::Path<String>,
) -> ApiResult<web::Json<LeaveResponse>> {
    let visitor = require_visitor(&state, &req)?;
    let session_id = parse_session_id(&path.into_inner())?;
    ensure_owner(&state, session_id, visitor).await?;
    let stay = state.presence.leave(session_id).await.map_err(Error::from)?;
    if matches!(session.visitor_session()?, Some((_, remembered)) if remembered == session_id) {
        session.forget_visit();
    }
    debug!(%session_id, stay_seconds = stay.num_seconds(), "visitor left");
    Ok(web::Json(LeaveResponse {
        session_id: session_id.to_string(),
        stay_seconds: stay.num_seconds(),
    }))
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
