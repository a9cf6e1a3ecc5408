//! Visitor sessions opened by a successful scan.
//!
//! A session moves `Open -> Closed{reason}` exactly once. Closed sessions are
//! kept for stay statistics and never reopen.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EpochSequence, VenueId};

/// Verified visitor identity supplied by the upstream identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorId(Uuid);

impl VisitorId {
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

impl fmt::Display for VisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for VisitorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a [`VisitorSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorSessionId(Uuid);

impl VisitorSessionId {
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

impl fmt::Display for VisitorSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for VisitorSessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Why a session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCloseReason {
    /// The visitor left.
    ExplicitLeave,
    /// No heartbeat within the idle threshold.
    IdleTimeout,
    /// Two full rotations passed since the epoch the session joined under.
    EpochExpiredTwice,
}

impl SessionCloseReason {
    /// Stable snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitLeave => "explicit_leave",
            Self::IdleTimeout => "idle_timeout",
            Self::EpochExpiredTwice => "epoch_expired_twice",
        }
    }
}

impl fmt::Display for SessionCloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for unknown close reason labels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown session close reason: {0}")]
pub struct ParseCloseReasonError(String);

impl FromStr for SessionCloseReason {
    type Err = ParseCloseReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit_leave" => Ok(Self::ExplicitLeave),
            "idle_timeout" => Ok(Self::IdleTimeout),
            "epoch_expired_twice" => Ok(Self::EpochExpiredTwice),
            other => Err(ParseCloseReasonError(other.to_owned())),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Counted as an active visitor.
    Open,
    /// Finished; no longer counted.
    Closed(SessionCloseReason),
}

/// Rejected state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionTransitionError {
    /// The session was already closed.
    #[error("session already closed ({0})")]
    AlreadyClosed(SessionCloseReason),
}

/// Presence of one visitor at one venue.
///
/// ## Invariants
/// - `epoch_sequence_joined` is the venue's active epoch at `joined_at`.
/// - `left_at` and `close_reason` are both set or both absent.
/// - `last_seen_at` never precedes `joined_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorSession {
    /// Session identifier.
    pub id: VisitorSessionId,
    /// Venue the session belongs to.
    pub venue_id: VenueId,
    /// Visitor owning the session.
    pub visitor_id: VisitorId,
    /// Active epoch when the session opened.
    pub epoch_sequence_joined: EpochSequence,
    /// Opening instant.
    pub joined_at: DateTime<Utc>,
    /// Latest heartbeat.
    pub last_seen_at: DateTime<Utc>,
    /// Closing instant.
    pub left_at: Option<DateTime<Utc>>,
    /// Closing reason.
    pub close_reason: Option<SessionCloseReason>,
}

impl VisitorSession {
    /// Open a new session.
    #[must_use]
    pub fn open(
        venue_id: VenueId,
        visitor_id: VisitorId,
        epoch_sequence_joined: EpochSequence,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VisitorSessionId::random(),
            venue_id,
            visitor_id,
            epoch_sequence_joined,
            joined_at,
            last_seen_at: joined_at,
            left_at: None,
            close_reason: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self.close_reason {
            Some(reason) => SessionState::Closed(reason),
            None => SessionState::Open,
        }
    }

    /// `true` while the session counts as present.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.close_reason.is_none()
    }

    /// Record a heartbeat; stale timestamps never move the watermark back.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen_at {
            self.last_seen_at = at;
        }
    }

    /// Close the session.
    ///
    /// # Errors
    /// Returns [`SessionTransitionError::AlreadyClosed`] for closed sessions.
    pub fn close(
        &mut self,
        reason: SessionCloseReason,
        at: DateTime<Utc>,
    ) -> Result<TimeDelta, SessionTransitionError> {
        if let Some(existing) = self.close_reason {
            return Err(SessionTransitionError::AlreadyClosed(existing));
        }
        let left_at = at.max(self.joined_at);
        self.left_at = Some(left_at);
        self.close_reason = Some(reason);
        Ok(left_at - self.joined_at)
    }

    /// Whether no heartbeat arrived within `idle_threshold` of `now`.
    #[must_use]
    pub fn is_idle(&self, now: DateTime<Utc>, idle_threshold: TimeDelta) -> bool {
        now - self.last_seen_at > idle_threshold
    }

    /// Whether the venue rotated at least twice since this session joined.
    #[must_use]
    pub fn outlived_epochs(&self, active: EpochSequence) -> bool {
        self.epoch_sequence_joined.rotations_until(active) >= 2
    }
}
