//! In-memory append-only chat log.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ports::{ChatHistoryStore, ChatHistoryStoreError};
use crate::domain::{ChatMessage, SequenceNumber, VenueId};

use super::lock;

/// Chat log keyed by venue, ordered by sequence.
#[derive(Debug, Default)]
pub struct InMemoryChatHistoryStore {
    logs: Mutex<HashMap<VenueId, BTreeMap<SequenceNumber, ChatMessage>>>,
}

impl InMemoryChatHistoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryChatHistoryStore {
    async fn append(&self, message: &ChatMessage) -> Result<(), ChatHistoryStoreError> {
        let mut logs = lock(&self.logs);
        let log = logs.entry(message.venue_id).or_default();
        if log.contains_key(&message.sequence_number) {
            return Err(ChatHistoryStoreError::sequence_conflict(
                message.sequence_number.get(),
            ));
        }
        log.insert(message.sequence_number, message.clone());
        Ok(())
    }

    async fn last_sequence(
        &self,
        venue_id: &VenueId,
    ) -> Result<SequenceNumber, ChatHistoryStoreError> {
        Ok(lock(&self.logs)
            .get(venue_id)
            .and_then(|log| log.last_key_value().map(|(sequence, _)| *sequence))
            .unwrap_or(SequenceNumber::ZERO))
    }

    async fn read_after(
        &self,
        venue_id: &VenueId,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatHistoryStoreError> {
        Ok(lock(&self.logs)
            .get(venue_id)
            .map(|log| {
                log.range(after.next()..)
                    .take(limit)
                    .map(|(_, message)| message.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
