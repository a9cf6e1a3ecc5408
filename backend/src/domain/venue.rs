//! Venue identity and rotation configuration.
//!
//! Venues are owned by the venue-settings collaborator; this system only reads
//! the fields that drive access-code rotation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueId(Uuid);

impl VenueId {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for VenueId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// How often a venue's access code rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationFrequency {
    /// One hour per epoch.
    Hourly,
    /// One day per epoch.
    Daily,
    /// Seven days per epoch.
    Weekly,
    /// One calendar month per epoch.
    Monthly,
}

impl RotationFrequency {
    /// Stable lowercase label used by persistence and wire payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Compute the expiry of an epoch generated at `generated_at`.
    ///
    /// Monthly epochs follow the calendar and clamp to the end of shorter
    /// months (31 January expires on 28/29 February).
    ///
    /// # Examples
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use venue_gateway::domain::RotationFrequency;
    ///
    /// let nine = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid");
    /// let ten = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("valid");
    /// assert_eq!(RotationFrequency::Hourly.expiry_after(nine), ten);
    /// ```
    #[must_use]
    pub fn expiry_after(self, generated_at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Hourly => generated_at + TimeDelta::hours(1),
            Self::Daily => generated_at + TimeDelta::days(1),
            Self::Weekly => generated_at + TimeDelta::weeks(1),
            Self::Monthly => generated_at
                .checked_add_months(Months::new(1))
                .unwrap_or(generated_at + TimeDelta::days(30)),
        }
    }
}

impl fmt::Display for RotationFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown rotation frequency label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rotation frequency: {0}")]
pub struct ParseRotationFrequencyError(String);

impl FromStr for RotationFrequency {
    type Err = ParseRotationFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ParseRotationFrequencyError(other.to_owned())),
        }
    }
}

/// Venue configuration as consumed from the venue-settings collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    /// Venue identifier.
    pub id: VenueId,
    /// Access-code rotation cadence.
    pub rotation_frequency: RotationFrequency,
    /// Inactive venues reject every access attempt.
    pub is_active: bool,
}

impl Venue {
    /// Build an active venue with the given cadence.
    #[must_use]
    pub const fn active(id: VenueId, rotation_frequency: RotationFrequency) -> Self {
        Self {
            id,
            rotation_frequency,
            is_active: true,
        }
    }
}
