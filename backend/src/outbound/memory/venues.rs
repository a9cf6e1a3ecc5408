//! Venue directory held in memory, optionally seeded from a JSON file.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use cap_std::{ambient_authority, fs::Dir};

use crate::domain::ports::{VenueDirectory, VenueDirectoryError};
use crate::domain::{Venue, VenueId};

use super::lock;

/// Failures loading a venue seed file.
#[derive(Debug, thiserror::Error)]
pub enum VenueSeedError {
    /// The file could not be read.
    #[error("failed to read venue seed file: {0}")]
    Io(#[from] io::Error),
    /// The file is not a JSON array of venues.
    #[error("failed to parse venue seed file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Mutable in-memory venue directory.
#[derive(Debug, Default)]
pub struct InMemoryVenueDirectory {
    venues: Mutex<HashMap<VenueId, Venue>>,
}

impl InMemoryVenueDirectory {
    /// Directory pre-populated with `venues`.
    #[must_use]
    pub fn new(venues: impl IntoIterator<Item = Venue>) -> Self {
        Self {
            venues: Mutex::new(venues.into_iter().map(|venue| (venue.id, venue)).collect()),
        }
    }

    /// Load venues from a JSON array file such as
    /// `[{"id": "...", "rotationFrequency": "hourly", "isActive": true}]`.
    ///
    /// # Errors
    /// Returns [`VenueSeedError`] when the file is unreadable or malformed.
    pub fn from_json_file(path: &Path) -> Result<Self, VenueSeedError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seed path has no file name")
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
        let raw = dir.read_to_string(file_name)?;
        let venues: Vec<Venue> = serde_json::from_str(&raw)?;
        Ok(Self::new(venues))
    }

    /// Insert or replace a venue.
    pub fn upsert(&self, venue: Venue) {
        lock(&self.venues).insert(venue.id, venue);
    }

    /// Every venue, active or not, ordered by id.
    #[must_use]
    pub fn venues(&self) -> Vec<Venue> {
        let mut all: Vec<Venue> = lock(&self.venues).values().cloned().collect();
        all.sort_by_key(|venue| venue.id);
        all
    }

    /// Toggle a venue's active flag. Returns `false` for unknown venues.
    #[must_use]
    pub fn set_active(&self, venue_id: VenueId, is_active: bool) -> bool {
        lock(&self.venues)
            .get_mut(&venue_id)
            .map(|venue| venue.is_active = is_active)
            .is_some()
    }
}

#[async_trait]
impl VenueDirectory for InMemoryVenueDirectory {
    async fn find(&self, venue_id: &VenueId) -> Result<Option<Venue>, VenueDirectoryError> {
        Ok(lock(&self.venues).get(venue_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Venue>, VenueDirectoryError> {
        let mut active: Vec<Venue> = lock(&self.venues)
            .values()
            .filter(|venue| venue.is_active)
            .cloned()
            .collect();
        active.sort_by_key(|venue| venue.id);
        Ok(active)
    }
}
