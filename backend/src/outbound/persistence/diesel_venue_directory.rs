//! PostgreSQL-backed `VenueDirectory`.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{VenueDirectory, VenueDirectoryError};
use crate::domain::{Venue, VenueId};

use super::diesel_basic_error_mapping::{map_diesel_error, map_pool_error};
use super::models::{NewVenueRow, VenueRow};
use super::pool::{DbPool, PoolError};
use super::schema::venues;

/// Diesel-backed venue directory.
#[derive(Clone)]
pub struct DieselVenueDirectory {
    pool: DbPool,
}

impl DieselVenueDirectory {
    /// Create a directory over `pool`.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace venues, used when seeding a fresh database.
    ///
    /// # Errors
    /// Returns [`VenueDirectoryError`] when the write fails.
    pub async fn upsert_all(&self, list: &[Venue]) -> Result<usize, VenueDirectoryError> {
        if list.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows: Vec<NewVenueRow<'_>> = list.iter().map(NewVenueRow::from).collect();
        diesel::insert_into(venues::table)
            .values(&rows)
            .on_conflict(venues::id)
            .do_update()
            .set((
                venues::rotation_frequency.eq(excluded(venues::rotation_frequency)),
                venues::is_active.eq(excluded(venues::is_active)),
                venues::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)
            .await
            .map_err(diesel_error)
    }
}

fn pool_error(error: PoolError) -> VenueDirectoryError {
    map_pool_error(error, VenueDirectoryError::connection)
}

fn diesel_error(error: diesel::result::Error) -> VenueDirectoryError {
    map_diesel_error(
        error,
        VenueDirectoryError::query,
        VenueDirectoryError::connection,
    )
}

fn decode(row: VenueRow) -> Result<Venue, VenueDirectoryError> {
    Venue::try_from(row).map_err(|err| VenueDirectoryError::query(err.to_string()))
}

#[async_trait]
impl VenueDirectory for DieselVenueDirectory {
    async fn find(&self, venue_id: &VenueId) -> Result<Option<Venue>, VenueDirectoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        venues::table
            .filter(venues::id.eq(venue_id.as_uuid()))
            .select(VenueRow::as_select())
            .first::<VenueRow>(&mut conn)
            .await
            .optional()
            .map_err(diesel_error)?
            .map(decode)
            .transpose()
    }

    async fn list_active(&self) -> Result<Vec<Venue>, VenueDirectoryError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        venues::table
            .filter(venues::is_active.eq(true))
            .order(venues::id.asc())
            .select(VenueRow::as_select())
            .load::<VenueRow>(&mut conn)
            .await
            .map_err(diesel_error)?
            .into_iter()
            .map(decode)
            .collect()
    }
}
