//! Shared helpers for the gateway integration tests.
//!
//! Each file under `tests/` compiles as its own crate; they pull this module
//! in with `mod support;` and use whichever helpers they need.

#![allow(
    dead_code,
    reason = "each integration test crate uses a different subset of helpers"
)]

use std::time::Duration;

use venue_gateway::domain::{
    ChatConnection, ChatDelivery, VenueId, VisitorId, VisitorSession,
};
use venue_gateway::test_support::harness::GatewayHarness;

/// Longest wait for a chat delivery before a test fails.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// A visitor admitted to a venue by scanning its current code.
pub struct Admitted {
    /// Visitor identity; its UUID doubles as the credential.
    pub visitor: VisitorId,
    /// Session opened by the scan.
    pub session: VisitorSession,
}

impl Admitted {
    /// Credential the harness authenticator accepts for this visitor.
    #[must_use]
    pub fn credential(&self) -> String {
        self.visitor.to_string()
    }
}

/// Scan `venue`'s current code as a fresh visitor.
///
/// # Panics
/// Panics when the scan is refused.
pub async fn admit(harness: &GatewayHarness, venue: VenueId) -> Admitted {
    let visitor = VisitorId::random();
    let epoch = harness
        .manager
        .current_epoch(venue)
        .await
        .expect("venue has an epoch");
    let outcome = harness
        .resolver
        .scan(venue, epoch.token_value.as_str(), visitor)
        .await
        .expect("scan admitted");
    Admitted {
        visitor,
        session: outcome.session,
    }
}

/// Admit a visitor and join the venue chat.
///
/// # Panics
/// Panics when the visitor cannot be admitted or connected.
pub async fn join_chat(harness: &GatewayHarness, venue: VenueId) -> (Admitted, ChatConnection) {
    let admitted = admit(harness, venue).await;
    let connection = harness
        .gateway
        .connect(venue, admitted.session.id, &admitted.credential())
        .await
        .expect("chat connection");
    (admitted, connection)
}

/// Next delivery on `connection`.
///
/// # Panics
/// Panics when nothing arrives within [`DELIVERY_TIMEOUT`] or the gateway
/// dropped the connection.
pub async fn next_delivery(connection: &mut ChatConnection) -> ChatDelivery {
    tokio::time::timeout(DELIVERY_TIMEOUT, connection.recv())
        .await
        .expect("delivery before timeout")
        .expect("connection still attached")
}
