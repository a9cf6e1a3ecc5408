//! Port for durable token epoch history.

use async_trait::async_trait;

use crate::domain::{EpochSequence, TokenEpoch, VenueId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by token epoch repository adapters.
    pub enum TokenEpochRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } => "token epoch repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "token epoch repository query failed: {message}",
        /// The expected predecessor is no longer the venue's active epoch.
        Conflict { message: String } => "token epoch conflict: {message}",
    }
}

/// Durable epoch history per venue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenEpochRepository: Send + Sync {
    /// Up to `limit` most recent epochs for a venue, newest first.
    async fn recent(
        &self,
        venue_id: &VenueId,
        limit: usize,
    ) -> Result<Vec<TokenEpoch>, TokenEpochRepositoryError>;

    /// Atomically supersede `expected_active` and store `next`.
    ///
    /// `expected_active == None` creates the venue's first epoch. Adapters
    /// return [`TokenEpochRepositoryError::Conflict`] when the venue's active
    /// sequence differs from `expected_active`.
    async fn append(
        &self,
        expected_active: Option<EpochSequence>,
        next: &TokenEpoch,
    ) -> Result<(), TokenEpochRepositoryError>;

    /// The active epoch of every venue with history.
    async fn list_active(&self) -> Result<Vec<TokenEpoch>, TokenEpochRepositoryError>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn conflict_formats_message() {
        let err = TokenEpochRepositoryError::conflict("active is 4, expected 3");
        assert!(err.to_string().contains("expected 3"));
        assert_eq!(err.kind(), "conflict");
    }
}
