//! Shared HTTP adapter state.
//!
//! Handlers receive this through `actix_web::web::Data` and reach the domain
//! only through the services it holds, so tests can wire it over in-memory
//! adapters.

use std::sync::Arc;

use mockable::Clock;
use url::Url;

use crate::domain::{AccessResolver, ChatGateway, PresenceTracker, TokenEpochManager};

/// Dependency bundle for HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Rotation state per venue.
    pub epochs: Arc<TokenEpochManager>,
    /// Scan validation and admission.
    pub resolver: Arc<AccessResolver>,
    /// Visitor sessions and counters.
    pub presence: Arc<PresenceTracker>,
    /// Live chat and history.
    pub gateway: Arc<ChatGateway>,
    /// Time source for countdowns.
    pub clock: Arc<dyn Clock>,
    /// Base of the QR payload URL shown on venue displays; unset hides `qrUrl`.
    pub qr_base: Option<Url>,
}
