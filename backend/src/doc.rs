//! OpenAPI documentation configuration.
//!
//! [`ApiDoc`] registers every REST endpoint, the chat socket upgrade and the
//! response bodies they share. Error payloads use the wrapper schemas from
//! [`crate::inbound::http::schemas`] so domain types stay free of utoipa.
//!
//! The document backs Swagger UI in debug builds and is printed by
//! `cargo run --bin openapi-dump` for external tooling.

use crate::inbound::http::access::{PayloadScanRequest, ScanRequest, ScanResponse};
use crate::inbound::http::epochs::EpochResponse;
use crate::inbound::http::messages::{ChatMessageBody, HistoryResponse};
use crate::inbound::http::presence::PresenceResponse;
use crate::inbound::http::schemas::{ErrorCodeSchema, ErrorSchema};
use crate::inbound::http::sessions::{HeartbeatResponse, LeaveResponse};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Enrich the generated document with the visitor credential scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::default);

        let bearer = HttpBuilder::new()
            .scheme(HttpAuthScheme::Bearer)
            .description(Some("Signed visitor credential issued by the identity service."))
            .build();
        components.add_security_scheme("VisitorCredential", SecurityScheme::Http(bearer));
    }
}

/// OpenAPI document for the gateway.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Venue gateway API",
        description = "Rotating venue access codes, visitor presence and per-venue live chat."
    ),
    servers(
        (url = "/", description = "Relative to the deployment base URL")
    ),
    paths(
        crate::inbound::http::epochs::current_epoch,
        crate::inbound::http::epochs::rotate_epoch,
        crate::inbound::http::access::scan,
        crate::inbound::http::access::scan_payload,
        crate::inbound::http::sessions::heartbeat,
        crate::inbound::http::sessions::leave,
        crate::inbound::http::presence::presence,
        crate::inbound::http::messages::list_messages,
        crate::inbound::ws::ws_entry,
        crate::inbound::http::health::ready,
        crate::inbound::http::health::live,
    ),
    components(schemas(
        EpochResponse,
        ScanRequest,
        PayloadScanRequest,
        ScanResponse,
        HeartbeatResponse,
        LeaveResponse,
        PresenceResponse,
        ChatMessageBody,
        HistoryResponse,
        ErrorSchema,
        ErrorCodeSchema
    )),
    tags(
        (name = "epochs", description = "Venue access codes and rotation"),
        (name = "access", description = "Scanning a venue code"),
        (name = "sessions", description = "Visitor session lifecycle"),
        (name = "presence", description = "Live visitor counters"),
        (name = "chat", description = "Venue chat history and socket"),
        (name = "health", description = "Endpoints for health checks")
    )
)]
pub struct ApiDoc;
