//! Port for the append-only per-venue chat log.

use async_trait::async_trait;

use crate::domain::{ChatMessage, SequenceNumber, VenueId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by chat history store adapters.
    pub enum ChatHistoryStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "chat history connection failed: {message}",
        /// Read or append failed during execution.
        Query { message: String } => "chat history query failed: {message}",
        /// The `(venue, sequence)` slot is already taken.
        SequenceConflict { sequence: u64 } =>
            "chat history already holds sequence {sequence}",
    }
}

/// Append-only, range-readable message log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// Durably append one message.
    ///
    /// Rejects an existing `(venue_id, sequence_number)` with
    /// [`ChatHistoryStoreError::SequenceConflict`].
    async fn append(&self, message: &ChatMessage) -> Result<(), ChatHistoryStoreError>;

    /// Highest stored sequence, or [`SequenceNumber::ZERO`] for an empty log.
    async fn last_sequence(&self, venue_id: &VenueId)
    -> Result<SequenceNumber, ChatHistoryStoreError>;

    /// Up to `limit` messages with `sequence_number > after`, ascending.
    async fn read_after(
        &self,
        venue_id: &VenueId,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatHistoryStoreError>;
}
