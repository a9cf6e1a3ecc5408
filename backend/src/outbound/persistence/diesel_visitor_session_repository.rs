//! PostgreSQL-backed `VisitorSessionRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{count_distinct, exists, select};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use uuid::Uuid;

use crate::domain::ports::{
    SessionInsertOutcome, VenueVisitorTotal, VisitorSessionRepository,
    VisitorSessionRepositoryError,
};
use crate::domain::{SessionCloseReason, VenueId, VisitorSession, VisitorSessionId};

use super::diesel_basic_error_mapping::{map_diesel_error, map_pool_error};
use super::models::{NewVisitorSessionRow, VisitorSessionRow};
use super::pool::{DbPool, PoolError};
use super::schema::visitor_sessions;

/// Diesel-backed session store.
#[derive(Clone)]
pub struct DieselVisitorSessionRepository {
    pool: DbPool,
}

impl DieselVisitorSessionRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn pool_error(error: PoolError) -> VisitorSessionRepositoryError {
    map_pool_error(error, VisitorSessionRepositoryError::connection)
}

fn diesel_error(error: DieselError) -> VisitorSessionRepositoryError {
    map_diesel_error(
        error,
        VisitorSessionRepositoryError::query,
        VisitorSessionRepositoryError::connection,
    )
}

fn decode(row: VisitorSessionRow) -> Result<VisitorSession, VisitorSessionRepositoryError> {
    VisitorSession::try_from(row)
        .map_err(|err| VisitorSessionRepositoryError::query(err.to_string()))
}

fn decode_all(
    rows: Vec<VisitorSessionRow>,
) -> Result<Vec<VisitorSession>, VisitorSessionRepositoryError> {
    rows.into_iter().map(decode).collect()
}

#[async_trait]
impl VisitorSessionRepository for DieselVisitorSessionRepository {
    async fn insert(
        &self,
        session: &VisitorSession,
    ) -> Result<SessionInsertOutcome, VisitorSessionRepositoryError> {
        let row = NewVisitorSessionRow::try_from(session)
            .map_err(|err| VisitorSessionRepositoryError::query(err.to_string()))?;
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        conn.transaction::<_, DieselError, _>(|conn| {
            async move {
                let seen_before: bool = select(exists(
                    visitor_sessions::table
                        .filter(visitor_sessions::venue_id.eq(row.venue_id))
                        .filter(visitor_sessions::visitor_id.eq(row.visitor_id)),
                ))
                .get_result(conn)
                .await?;
                diesel::insert_into(visitor_sessions::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
                Ok(SessionInsertOutcome {
                    first_visit: !seen_before,
                })
            }
            .scope_boxed()
        })
        .await
        .map_err(diesel_error)
    }

    async fn find(
        &self,
        session_id: &VisitorSessionId,
    ) -> Result<Option<VisitorSession>, VisitorSessionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        visitor_sessions::table
            .filter(visitor_sessions::id.eq(session_id.as_uuid()))
            .select(VisitorSessionRow::as_select())
            .first::<VisitorSessionRow>(&mut conn)
            .await
            .optional()
            .map_err(diesel_error)?
            .map(decode)
            .transpose()
    }

    async fn touch(
        &self,
        session_id: &VisitorSessionId,
        at: DateTime<Utc>,
    ) -> Result<(), VisitorSessionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        diesel::update(
            visitor_sessions::table
                .filter(visitor_sessions::id.eq(session_id.as_uuid()))
                .filter(visitor_sessions::close_reason.is_null())
                .filter(visitor_sessions::last_seen_at.lt(at)),
        )
        .set(visitor_sessions::last_seen_at.eq(at))
        .execute(&mut conn)
        .await
        .map(|_| ())
        .map_err(diesel_error)
    }

    async fn close(
        &self,
        session_id: &VisitorSessionId,
        reason: SessionCloseReason,
        at: DateTime<Utc>,
    ) -> Result<bool, VisitorSessionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let closed = diesel::update(
            visitor_sessions::table
                .filter(visitor_sessions::id.eq(session_id.as_uuid()))
                .filter(visitor_sessions::close_reason.is_null()),
        )
        .set((
            visitor_sessions::left_at.eq(Some(at)),
            visitor_sessions::close_reason.eq(Some(reason.as_str())),
        ))
        .execute(&mut conn)
        .await
        .map_err(diesel_error)?;
        Ok(closed == 1)
    }

    async fn list_open(&self) -> Result<Vec<VisitorSession>, VisitorSessionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows = visitor_sessions::table
            .filter(visitor_sessions::close_reason.is_null())
            .order(visitor_sessions::joined_at.asc())
            .select(VisitorSessionRow::as_select())
            .load::<VisitorSessionRow>(&mut conn)
            .await
            .map_err(diesel_error)?;
        decode_all(rows)
    }

    async fn list_closed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VisitorSession>, VisitorSessionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows = visitor_sessions::table
            .filter(visitor_sessions::left_at.ge(since))
            .order(visitor_sessions::left_at.asc())
            .select(VisitorSessionRow::as_select())
            .load::<VisitorSessionRow>(&mut conn)
            .await
            .map_err(diesel_error)?;
        decode_all(rows)
    }

    async fn visitor_totals(
        &self,
    ) -> Result<Vec<VenueVisitorTotal>, VisitorSessionRepositoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows: Vec<(Uuid, i64)> = visitor_sessions::table
            .group_by(visitor_sessions::venue_id)
            .select((
                visitor_sessions::venue_id,
                count_distinct(visitor_sessions::visitor_id),
            ))
            .load(&mut conn)
            .await
            .map_err(diesel_error)?;
        Ok(rows
            .into_iter()
            .map(|(venue_id, total)| VenueVisitorTotal {
                venue_id: VenueId::from_uuid(venue_id),
                total_visitors: u64::try_from(total).unwrap_or(0),
            })
            .collect())
    }
}
