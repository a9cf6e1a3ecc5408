//! Venue gateway library: rotating venue access codes, visitor presence and
//! per-venue live chat.
//!
//! The crate follows a hexagonal layout:
//! - [`domain`] owns the entities, invariants, services and ports;
//! - [`inbound`] adapts HTTP and WebSocket traffic onto domain services;
//! - [`outbound`] implements the driven ports (PostgreSQL, in-memory stores,
//!   RNG, credential verification, event sinks, metrics).

pub mod doc;
pub mod domain;
pub mod inbound;
pub mod middleware;
pub mod outbound;
pub mod settings;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

/// Public OpenAPI surface used by Swagger UI and tooling.
pub use doc::ApiDoc;
pub use domain::TraceId;
pub use middleware::Trace;
