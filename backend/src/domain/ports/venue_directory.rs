//! Port onto the venue-settings collaborator.

use async_trait::async_trait;

use crate::domain::{Venue, VenueId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by venue directory adapters.
    pub enum VenueDirectoryError {
        /// Directory connection could not be established.
        Connection { message: String } => "venue directory connection failed: {message}",
        /// Lookup failed during execution.
        Query { message: String } => "venue directory query failed: {message}",
    }
}

/// Read-only access to venue configuration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueDirectory: Send + Sync {
    /// Look up one venue.
    async fn find(&self, venue_id: &VenueId) -> Result<Option<Venue>, VenueDirectoryError>;

    /// Every venue currently marked active.
    async fn list_active(&self) -> Result<Vec<Venue>, VenueDirectoryError>;
}
