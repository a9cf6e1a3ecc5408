//! Shared validation helpers for inbound HTTP adapters.
//!
//! Path segments and body fields arrive as strings so a bad value produces a
//! structured `invalid_request` naming the field, rather than actix's bare 404
//! for an unmatched typed path.

use actix_web::HttpRequest;
use actix_web::http::header::AUTHORIZATION;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{Error, VenueId, VisitorSessionId};

/// Validation error codes reported in `details.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorCode {
    MissingField,
    InvalidUuid,
    OutOfRange,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingField => "missing_field",
            ErrorCode::InvalidUuid => "invalid_uuid",
            ErrorCode::OutOfRange => "out_of_range",
        }
    }
}

/// Newtype wrapper for HTTP field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldName(&'static str);

impl FieldName {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self(name)
    }

    fn as_str(self) -> &'static str {
        self.0
    }
}

fn field_error(field: FieldName, message: String, code: ErrorCode, value: Option<&str>) -> Error {
    let mut details = json!({
        "field": field.as_str(),
        "code": code.as_str(),
    });
    if let Some(value) = value {
        details["value"] = json!(value);
    }
    Error::invalid_request(message).with_details(details)
}

pub(crate) fn missing_field_error(field: FieldName) -> Error {
    field_error(
        field,
        format!("missing required field: {}", field.as_str()),
        ErrorCode::MissingField,
        None,
    )
}

pub(crate) fn out_of_range_error(field: FieldName, value: &str, expected: &str) -> Error {
    field_error(
        field,
        format!("{} must be {expected}", field.as_str()),
        ErrorCode::OutOfRange,
        Some(value),
    )
}

pub(crate) fn parse_uuid(value: &str, field: FieldName) -> Result<Uuid, Error> {
    Uuid::parse_str(value).map_err(|_| {
        field_error(
            field,
            format!("{} must be a valid UUID", field.as_str()),
            ErrorCode::InvalidUuid,
            Some(value),
        )
    })
}

pub(crate) fn parse_venue_id(value: &str) -> Result<VenueId, Error> {
    parse_uuid(value, FieldName::new("venueId")).map(VenueId::from_uuid)
}

pub(crate) fn parse_session_id(value: &str) -> Result<VisitorSessionId, Error> {
    parse_uuid(value, FieldName::new("sessionId")).map(VisitorSessionId::from_uuid)
}

/// Require a non-blank string field.
pub(crate) fn require_text(value: Option<String>, field: FieldName) -> Result<String, Error> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_owned()),
        _ => Err(missing_field_error(field)),
    }
}

/// Visitor credential from `Authorization: Bearer <credential>`.
///
/// Returns `None` when the header is absent or uses another scheme; the
/// caller decides whether a query-string fallback applies.
pub(crate) fn bearer_credential(req: &HttpRequest) -> Option<String> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, credential) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let credential = credential.trim();
    (!credential.is_empty()).then(|| credential.to_owned())
}
