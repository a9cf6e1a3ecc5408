//! OpenAPI schema definitions for domain types.
//!
//! Domain types stay framework-agnostic and do not derive `ToSchema`. The
//! wrappers here mirror their wire shape so utoipa can document them from the
//! adapter layer.

use utoipa::ToSchema;

/// OpenAPI schema for [`crate::domain::ErrorCode`].
#[derive(ToSchema)]
#[schema(as = crate::domain::ErrorCode)]
pub enum ErrorCodeSchema {
    /// The request is malformed or fails validation.
    #[schema(rename = "invalid_request")]
    InvalidRequest,
    /// The visitor credential is missing or refused.
    #[schema(rename = "unauthorized")]
    Unauthorized,
    /// The code expired, the venue is inactive or the session is not the caller's.
    #[schema(rename = "forbidden")]
    Forbidden,
    /// The venue or session does not exist.
    #[schema(rename = "not_found")]
    NotFound,
    /// The session already closed.
    #[schema(rename = "conflict")]
    Conflict,
    /// Storage or rotation is degraded; retry later.
    #[schema(rename = "service_unavailable")]
    ServiceUnavailable,
    /// An unexpected error occurred on the server.
    #[schema(rename = "internal_error")]
    InternalError,
}

/// OpenAPI schema for [`crate::domain::Error`].
#[derive(ToSchema)]
#[schema(as = crate::domain::Error, rename_all = "camelCase")]
#[expect(
    dead_code,
    reason = "Used only for OpenAPI schema generation via utoipa"
)]
pub struct ErrorSchema {
    /// Stable machine-readable error code.
    #[schema(example = "forbidden")]
    code: ErrorCodeSchema,
    /// Human-readable message returned to clients.
    #[schema(example = "code expired, rescan")]
    message: String,
    /// Correlation identifier, also sent as the `Trace-Id` header.
    #[schema(example = "7b0c6c44-97f4-4b8e-9a38-0a8d44c3ed55")]
    trace_id: Option<String>,
    /// Supplementary details, such as the offending field.
    details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use utoipa::PartialSchema;

    fn schema_to_json<T: PartialSchema>() -> String {
        serde_json::to_string(&T::schema()).expect("schema serialises to JSON")
    }

    #[rstest]
    fn error_schema_uses_the_wire_field_names() {
        let schema_json = schema_to_json::<ErrorSchema>();

        // utoipa replaces :: with . in schema names
        assert_eq!(ErrorSchema::name(), "crate.domain.Error");
        assert!(schema_json.contains("traceId"));
        assert!(!schema_json.contains("trace_id"));
    }

    #[rstest]
    #[case("invalid_request")]
    #[case("unauthorized")]
    #[case("forbidden")]
    #[case("not_found")]
    #[case("conflict")]
    #[case("service_unavailable")]
    #[case("internal_error")]
    fn error_code_schema_lists_every_domain_code(#[case] code: &str) {
        let schema_json = schema_to_json::<ErrorCodeSchema>();
        assert!(schema_json.contains(code), "missing {code}");
        let wire = serde_json::to_value(
            serde_json::from_value::<crate::domain::ErrorCode>(serde_json::json!(code))
                .expect("domain code"),
        )
        .expect("serialise");
        assert_eq!(wire, serde_json::json!(code));
    }
}
