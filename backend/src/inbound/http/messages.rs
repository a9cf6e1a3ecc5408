//! Chat history for a venue.
//!
//! ```text
//! GET /api/v1/venues/{venue_id}/messages?since=12&limit=50&session={session_id}
//! ```
//!
//! History is only for visitors present at the venue: the caller presents the
//! visitor credential and an open session there, either as `session` or
//! through the cookie written by the last scan.
//!
//! A client joining mid-conversation reads history up to the `watermark`
//! its WebSocket `welcome` frame reported, then relies on live frames.

use actix_web::{HttpRequest, get, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{
    ChatMessage, Error, HistoryPage, HistoryQuery, SequenceNumber, VenueId, VisitorSessionId,
};
use crate::inbound::http::ApiResult;
use crate::inbound::http::access::require_visitor;
use crate::inbound::http::schemas::ErrorSchema;
use crate::inbound::http::session::SessionContext;
use crate::inbound::http::state::HttpState;
use crate::inbound::http::validation::{
    FieldName, out_of_range_error, parse_session_id, parse_venue_id,
};

/// Range parameters for a history page.
#[derive(Debug, Default, Deserialize, Serialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// Return messages with a sequence strictly greater than this.
    pub since: Option<u64>,
    /// Page size, 1 to 200; defaults to 50.
    pub limit: Option<usize>,
    /// Visitor session at this venue; defaults to the one in the cookie.
    pub session: Option<String>,
}

/// One chat message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageBody {
    /// Message identifier.
    #[schema(format = "uuid")]
    pub id: String,
    /// Venue the message was posted to.
    #[schema(format = "uuid")]
    pub venue_id: String,
    /// Session of the visitor who posted it.
    #[schema(format = "uuid")]
    pub sender_session_id: String,
    /// Message body.
    pub text: String,
    /// Time the gateway accepted the message.
    pub created_at: DateTime<Utc>,
    /// Per-venue sequence number, starting at 1.
    pub sequence_number: u64,
}

impl From<ChatMessage> for ChatMessageBody {
    fn from(value: ChatMessage) -> Self {
        Self {
            id: value.id.to_string(),
            venue_id: value.venue_id.to_string(),
            sender_session_id: value.sender_session_id.to_string(),
            text: value.text.as_str().to_owned(),
            created_at: value.created_at,
            sequence_number: value.sequence_number.get(),
        }
    }
}

/// Ordered slice of a venue's history.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    /// Messages in ascending sequence order.
    pub messages: Vec<ChatMessageBody>,
    /// Highest durable sequence when the page was read.
    pub watermark: u64,
    /// More messages follow the last one returned.
    pub has_more: bool,
}

impl From<HistoryPage> for HistoryResponse {
    fn from(value: HistoryPage) -> Self {
        Self {
            messages: value.messages.into_iter().map(Into::into).collect(),
            watermark: value.watermark.get(),
            has_more: value.has_more,
        }
    }
}

fn history_query(params: &HistoryParams) -> Result<HistoryQuery, Error> {
    if params.limit == Some(0) {
        return Err(out_of_range_error(
            FieldName::new("limit"),
            "0",
            "between 1 and 200",
        ));
    }
    Ok(HistoryQuery::new(
        params.since.map(SequenceNumber::new),
        params.limit,
    ))
}

fn visiting_session(
    visit: &SessionContext,
    venue_id: VenueId,
    requested: Option<&str>,
) -> Result<VisitorSessionId, Error> {
    if let Some(raw) = requested {
        return parse_session_id(raw);
    }
    match visit.visitor_session()? {
        Some((remembered_venue, session_id)) if remembered_venue == venue_id => Ok(session_id),
        _ => Err(Error::forbidden("an open session at this venue is required")),
    }
}

/// Messages after `since`, oldest first.
///
/// Only visitors holding an open session at the venue may read its history.
#[utoipa::path(
    get,
    path = "/api/v1/venues/{venue_id}/messages",
    params(
        ("venue_id" = String, Path, format = "uuid", description = "Venue identifier"),
        HistoryParams
    ),
    responses(
        (status = 200, description = "History page", body = HistoryResponse),
        (status = 400, description = "Invalid request", body = ErrorSchema),
        (status = 401, description = "Missing or refused visitor credential", body = ErrorSchema),
        (status = 403, description = "No open session at this venue", body = ErrorSchema),
        (status = 503, description = "History unavailable", body = ErrorSchema)
    ),
    tags = ["chat"],
    operation_id = "listMessages",
    security(("VisitorCredential" = []))
)]
#[get("/venues/{venue_id}/messages")]
pub async fn list_messages(
    state: web::Data<HttpState>,
    visit: SessionContext,
    req: HttpRequest,
    path: web::Path<String>,
    params: web::Query<HistoryParams>,
) -> ApiResult<web::Json<HistoryResponse>> {
    let visitor = require_visitor(&state, &req)?;
    let venue_id = parse_venue_id(&path.into_inner())?;
    let query = history_query(&params)?;
    let session_id = visiting_session(&visit, venue_id, params.session.as_deref())?;
    state
        .gateway
        .authorize(venue_id, session_id, visitor)
        .await
        .map_err(Error::from)?;
    let page = state
        .gateway
        .history(venue_id, query)
        .await
        .map_err(Error::from)?;
    Ok(web::Json(page.into()))
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
