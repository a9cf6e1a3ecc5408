//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **memory**: in-process stores for single-node runs and tests
//! - **persistence**: PostgreSQL-backed repositories using Diesel ORM
//! - **tokens**: operating-system CSPRNG token generator
//! - **credentials**: shared-secret visitor credential verification
//! - **events**: `tracing` audit sink for domain events
//! - **metrics**: Prometheus-backed metrics exporters (feature-gated)
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod credentials;
pub mod events;
pub mod memory;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod persistence;
pub mod tokens;
