//! Domain ports defining the edges of the hexagon.
//!
//! Ports describe how the domain expects to interact with driven adapters
//! (databases, entropy, identity verification, event and metrics exporters).
//! Each trait exposes strongly typed errors so adapters map their failures
//! into predictable variants.

mod macros;
pub(crate) use macros::define_port_error;

mod chat_history_store;
mod domain_event_sink;
mod gateway_metrics;
mod token_epoch_repository;
mod token_generator;
mod venue_directory;
mod visitor_authenticator;
mod visitor_session_repository;

#[cfg(test)]
pub use chat_history_store::MockChatHistoryStore;
pub use chat_history_store::{ChatHistoryStore, ChatHistoryStoreError};
#[cfg(test)]
pub use domain_event_sink::MockDomainEventSink;
pub use domain_event_sink::{DomainEventSink, DomainEventSinkError};
pub use gateway_metrics::{GatewayMetrics, GatewayMetricsError, NoOpGatewayMetrics};
#[cfg(test)]
pub use token_epoch_repository::MockTokenEpochRepository;
pub use token_epoch_repository::{TokenEpochRepository, TokenEpochRepositoryError};
#[cfg(test)]
pub use token_generator::MockTokenGenerator;
pub use token_generator::{TokenGenerator, TokenGeneratorError};
#[cfg(test)]
pub use venue_directory::MockVenueDirectory;
pub use venue_directory::{VenueDirectory, VenueDirectoryError};
#[cfg(test)]
pub use visitor_authenticator::MockVisitorAuthenticator;
pub use visitor_authenticator::{VisitorAuthError, VisitorAuthenticator};
#[cfg(test)]
pub use visitor_session_repository::MockVisitorSessionRepository;
pub use visitor_session_repository::{
    SessionInsertOutcome, VenueVisitorTotal, VisitorSessionRepository,
    VisitorSessionRepositoryError,
};
