//! In-memory epoch history.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ports::{TokenEpochRepository, TokenEpochRepositoryError};
use crate::domain::{EpochSequence, TokenEpoch, VenueId};

use super::lock;

/// Epoch history per venue, oldest first.
#[derive(Debug, Default)]
pub struct InMemoryTokenEpochRepository {
    history: Mutex<HashMap<VenueId, Vec<TokenEpoch>>>,
}

impl InMemoryTokenEpochRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full history of a venue, oldest first.
    #[must_use]
    pub fn history(&self, venue_id: &VenueId) -> Vec<TokenEpoch> {
        lock(&self.history)
            .get(venue_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TokenEpochRepository for InMemoryTokenEpochRepository {
    async fn recent(
        &self,
        venue_id: &VenueId,
        limit: usize,
    ) -> Result<Vec<TokenEpoch>, TokenEpochRepositoryError> {
        Ok(lock(&self.history)
            .get(venue_id)
            .map(|epochs| epochs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn append(
        &self,
        expected_active: Option<EpochSequence>,
        next: &TokenEpoch,
    ) -> Result<(), TokenEpochRepositoryError> {
        let mut history = lock(&self.history);
        let epochs = history.entry(next.venue_id).or_default();
        let active = epochs.last().map(|epoch| epoch.epoch_sequence);
        if active != expected_active {
            return Err(TokenEpochRepositoryError::conflict(format!(
                "venue {} active sequence is {active:?}, expected {expected_active:?}",
                next.venue_id
            )));
        }
        let required = active.map_or(EpochSequence::FIRST, EpochSequence::next);
        if next.epoch_sequence != required {
            return Err(TokenEpochRepositoryError::conflict(format!(
                "next sequence must be {required}, got {}",
                next.epoch_sequence
            )));
        }
        epochs.push(next.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<TokenEpoch>, TokenEpochRepositoryError> {
        Ok(lock(&self.history)
            .values()
            .filter_map(|epochs| epochs.last().cloned())
            .collect())
    }
}
