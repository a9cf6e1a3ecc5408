//! PostgreSQL-backed `ChatHistoryStore`.
//!
//! The unique `(venue_id, sequence_number)` constraint turns a duplicate
//! allocation into [`ChatHistoryStoreError::SequenceConflict`], which the
//! venue actor treats as a sequence gap.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{ChatHistoryStore, ChatHistoryStoreError};
use crate::domain::{ChatMessage, SequenceNumber, VenueId};

use super::diesel_basic_error_mapping::{is_unique_violation, map_diesel_error, map_pool_error};
use super::models::{ChatMessageRow, NewChatMessageRow, to_column};
use super::pool::{DbPool, PoolError};
use super::schema::chat_messages;

/// Diesel-backed chat log.
#[derive(Clone)]
pub struct DieselChatHistoryStore {
    pool: DbPool,
}

impl DieselChatHistoryStore {
    /// Create a store over `pool`.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn pool_error(error: PoolError) -> ChatHistoryStoreError {
    map_pool_error(error, ChatHistoryStoreError::connection)
}

fn diesel_error(error: DieselError) -> ChatHistoryStoreError {
    map_diesel_error(
        error,
        ChatHistoryStoreError::query,
        ChatHistoryStoreError::connection,
    )
}

fn column_error(err: impl ToString) -> ChatHistoryStoreError {
    ChatHistoryStoreError::query(err.to_string())
}

#[async_trait]
impl ChatHistoryStore for DieselChatHistoryStore {
    async fn append(&self, message: &ChatMessage) -> Result<(), ChatHistoryStoreError> {
        let row = NewChatMessageRow::try_from(message).map_err(column_error)?;
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        diesel::insert_into(chat_messages::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|error| {
                if is_unique_violation(&error) {
                    ChatHistoryStoreError::sequence_conflict(message.sequence_number.get())
                } else {
                    diesel_error(error)
                }
            })
    }

    async fn last_sequence(
        &self,
        venue_id: &VenueId,
    ) -> Result<SequenceNumber, ChatHistoryStoreError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let highest: Option<i64> = chat_messages::table
            .filter(chat_messages::venue_id.eq(venue_id.as_uuid()))
            .select(diesel::dsl::max(chat_messages::sequence_number))
            .first(&mut conn)
            .await
            .map_err(diesel_error)?;
        highest
            .map(|value| u64::try_from(value).map(SequenceNumber::new).map_err(column_error))
            .transpose()
            .map(Option::unwrap_or_default)
    }

    async fn read_after(
        &self,
        venue_id: &VenueId,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatHistoryStoreError> {
        let after = to_column("sequence_number", after.get()).map_err(column_error)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        chat_messages::table
            .filter(chat_messages::venue_id.eq(venue_id.as_uuid()))
            .filter(chat_messages::sequence_number.gt(after))
            .order(chat_messages::sequence_number.asc())
            .limit(limit)
            .select(ChatMessageRow::as_select())
            .load::<ChatMessageRow>(&mut conn)
            .await
            .map_err(diesel_error)?
            .into_iter()
            .map(|row| ChatMessage::try_from(row).map_err(column_error))
            .collect()
    }
}
