//! Test helpers for inbound HTTP components.

use actix_session::{SessionMiddleware, storage::CookieSessionStore};
use actix_web::cookie::{Cookie, Key};
use actix_web::dev::ServiceResponse;
use actix_web::web;

use crate::inbound::http::state::HttpState;
use crate::test_support::harness::GatewayHarness;

/// Build a session middleware configured for tests.
///
/// - Generates a fresh signing/encryption key per invocation.
/// - Sets the cookie name to `session` and disables the `Secure` flag for
///   local HTTP tests.
#[must_use]
pub fn test_session_middleware() -> SessionMiddleware<CookieSessionStore> {
    SessionMiddleware::builder(CookieSessionStore::default(), Key::generate())
        .cookie_name("session".to_owned())
        .cookie_secure(false)
        .build()
}

/// The `session` cookie set on `response`.
///
/// # Panics
/// Panics when the response did not set the cookie.
#[must_use]
pub fn session_cookie<B>(response: &ServiceResponse<B>) -> Cookie<'static> {
    response
        .response()
        .cookies()
        .find(|cookie| cookie.name() == "session")
        .expect("session cookie set")
        .into_owned()
}

/// Handler state over the harness services; visitor credentials are bare UUIDs.
#[must_use]
pub fn harness_state(harness: &GatewayHarness) -> web::Data<HttpState> {
    web::Data::new(HttpState {
        epochs: harness.manager.clone(),
        resolver: harness.resolver.clone(),
        presence: harness.presence.clone(),
        gateway: harness.gateway.clone(),
        clock: harness.clock.clone(),
        qr_base: url::Url::parse("https://gate.example/").ok(),
    })
}
