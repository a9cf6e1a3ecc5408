//! PostgreSQL-backed `TokenEpochRepository`.
//!
//! A rotation is one transaction: the expected active row is superseded
//! conditionally, then the successor is inserted. The partial unique index on
//! `(venue_id) WHERE superseded_at IS NULL` backs the single-active-epoch rule
//! even if two processes race.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::domain::ports::{TokenEpochRepository, TokenEpochRepositoryError};
use crate::domain::{EpochSequence, TokenEpoch, VenueId};

use super::diesel_basic_error_mapping::{is_unique_violation, map_diesel_error, map_pool_error};
use super::models::{NewTokenEpochRow, TokenEpochRow, to_column};
use super::pool::{DbPool, PoolError};
use super::schema::token_epochs;

/// Diesel-backed epoch history.
#[derive(Clone)]
pub struct DieselTokenEpochRepository {
    pool: DbPool,
}

impl DieselTokenEpochRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn pool_error(error: PoolError) -> TokenEpochRepositoryError {
    map_pool_error(error, TokenEpochRepositoryError::connection)
}

fn diesel_error(error: DieselError) -> TokenEpochRepositoryError {
    map_diesel_error(
        error,
        TokenEpochRepositoryError::query,
        TokenEpochRepositoryError::connection,
    )
}

fn decode(row: TokenEpochRow) -> Result<TokenEpoch, TokenEpochRepositoryError> {
    TokenEpoch::try_from(row).map_err(|err| TokenEpochRepositoryError::query(err.to_string()))
}

/// Transaction outcome; Diesel needs `From<diesel::result::Error>`.
enum AppendFailure {
    Diesel(DieselError),
    Conflict(String),
}

impl From<DieselError> for AppendFailure {
    fn from(error: DieselError) -> Self {
        if is_unique_violation(&error) {
            Self::Conflict("another epoch is already active".to_owned())
        } else {
            Self::Diesel(error)
        }
    }
}

impl From<AppendFailure> for TokenEpochRepositoryError {
    fn from(failure: AppendFailure) -> Self {
        match failure {
            AppendFailure::Diesel(error) => diesel_error(error),
            AppendFailure::Conflict(message) => Self::conflict(message),
        }
    }
}

#[async_trait]
impl TokenEpochRepository for DieselTokenEpochRepository {
    async fn recent(
        &self,
        venue_id: &VenueId,
        limit: usize,
    ) -> Result<Vec<TokenEpoch>, TokenEpochRepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        token_epochs::table
            .filter(token_epochs::venue_id.eq(venue_id.as_uuid()))
            .order(token_epochs::epoch_sequence.desc())
            .limit(limit)
            .select(TokenEpochRow::as_select())
            .load::<TokenEpochRow>(&mut conn)
            .await
            .map_err(diesel_error)?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn append(
        &self,
        expected_active: Option<EpochSequence>,
        next: &TokenEpoch,
    ) -> Result<(), TokenEpochRepositoryError> {
        let row = NewTokenEpochRow::try_from(next)
            .map_err(|err| TokenEpochRepositoryError::query(err.to_string()))?;
        let expected = expected_active
            .map(|sequence| to_column("epoch_sequence", sequence.get()))
            .transpose()
            .map_err(|err| TokenEpochRepositoryError::query(err.to_string()))?;
        let venue = *next.venue_id.as_uuid();
        let superseded_at = next.generated_at;

        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, AppendFailure, _>(|conn| {
            async move {
                if let Some(expected) = expected {
                    let superseded = diesel::update(
                        token_epochs::table
                            .filter(token_epochs::venue_id.eq(venue))
                            .filter(token_epochs::epoch_sequence.eq(expected))
                            .filter(token_epochs::superseded_at.is_null()),
                    )
                    .set(token_epochs::superseded_at.eq(Some(superseded_at)))
                    .execute(conn)
                    .await?;
                    if superseded == 0 {
                        return Err(AppendFailure::Conflict(format!(
                            "epoch {expected} is no longer active"
                        )));
                    }
                }
                diesel::insert_into(token_epochs::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
        .map_err(TokenEpochRepositoryError::from)
    }

    async fn list_active(&self) -> Result<Vec<TokenEpoch>, TokenEpochRepositoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        token_epochs::table
            .filter(token_epochs::superseded_at.is_null())
            .order(token_epochs::venue_id.asc())
            .select(TokenEpochRow::as_select())
            .load::<TokenEpochRow>(&mut conn)
            .await
            .map_err(diesel_error)?
            .into_iter()
            .map(decode)
            .collect()
    }
}
