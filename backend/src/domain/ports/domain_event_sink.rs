//! Port for publishing domain events.

use async_trait::async_trait;

use crate::domain::DomainEvent;

use super::define_port_error;

define_port_error! {
    /// Errors raised by event sinks.
    pub enum DomainEventSinkError {
        /// The sink rejected the event.
        Publish { message: String } => "domain event publish failed: {message}",
    }
}

/// Receiver of [`DomainEvent`]s. Publishing is best effort.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DomainEventSink: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: &DomainEvent) -> Result<(), DomainEventSinkError>;
}
