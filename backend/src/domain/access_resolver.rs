//! Checks presented venue codes and admits visitors.
//!
//! Visitors only ever hear "code expired, rescan"; the distinction between a
//! wrong code and an outdated one is kept for logs and metrics.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tracing::{debug, info, warn};

use crate::domain::epoch_manager::{RotationError, TokenEpochManager};
use crate::domain::ports::{GatewayMetrics, VenueDirectory};
use crate::domain::presence::{PresenceError, PresenceTracker};
use crate::domain::{
    EpochSequence, EpochSnapshot, Error, TokenEpoch, VenueId, VisitorId, VisitorSession,
};

/// Message shown to visitors for every token rejection.
pub const RESCAN_MESSAGE: &str = "code expired, rescan";

/// Resolver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessResolverConfig {
    /// How long past expiry the current code stays valid while rotation is
    /// stalled.
    pub grace_window: TimeDelta,
}

impl Default for AccessResolverConfig {
    fn default() -> Self {
        Self {
            grace_window: TimeDelta::minutes(5),
        }
    }
}

/// Why a scan was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    /// The code is not the venue's current code.
    #[error("presented token does not match the venue's current token")]
    TokenMismatch,
    /// The code was valid but its window has closed.
    #[error("presented token has expired")]
    TokenExpired,
    /// The venue is not accepting visitors.
    #[error("venue {0} is inactive")]
    VenueInactive(VenueId),
    /// The venue does not exist.
    #[error("venue {0} does not exist")]
    VenueNotFound(VenueId),
    /// The venue rotated between validation and admission.
    #[error("epoch {presented} is no longer active (active is {active})")]
    StaleEpoch {
        /// Sequence the caller asked to join under.
        presented: EpochSequence,
        /// Sequence active now.
        active: EpochSequence,
    },
    /// Venue state could not be read.
    #[error("access check unavailable: {0}")]
    Unavailable(String),
    /// The session could not be opened.
    #[error(transparent)]
    Presence(#[from] PresenceError),
}

impl AccessDenied {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TokenMismatch => "token_mismatch",
            Self::TokenExpired => "token_expired",
            Self::VenueInactive(_) => "venue_inactive",
            Self::VenueNotFound(_) => "venue_not_found",
            Self::StaleEpoch { .. } => "stale_epoch",
            Self::Unavailable(_) => "unavailable",
            Self::Presence(_) => "presence",
        }
    }
}

impl From<RotationError> for AccessDenied {
    fn from(value: RotationError) -> Self {
        match value {
            RotationError::VenueNotFound(venue_id) => Self::VenueNotFound(venue_id),
            RotationError::VenueInactive(venue_id) => Self::VenueInactive(venue_id),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<AccessDenied> for Error {
    fn from(value: AccessDenied) -> Self {
        match value {
            AccessDenied::TokenMismatch
            | AccessDenied::TokenExpired
            | AccessDenied::StaleEpoch { .. } => Self::forbidden(RESCAN_MESSAGE),
            AccessDenied::VenueInactive(_) => Self::forbidden("venue is not accepting visitors"),
            AccessDenied::VenueNotFound(_) => Self::not_found("venue not found"),
            AccessDenied::Unavailable(_) => {
                Self::service_unavailable("access check is temporarily unavailable")
            }
            AccessDenied::Presence(err) => err.into(),
        }
    }
}

/// A successful scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Open session for the visitor.
    pub session: VisitorSession,
    /// Epoch the code belonged to.
    pub epoch: TokenEpoch,
    /// `true` when an existing session was returned for a repeat scan.
    pub debounced: bool,
}

/// Validates codes against the epoch manager and opens sessions.
pub struct AccessResolver {
    venues: Arc<dyn VenueDirectory>,
    epochs: Arc<TokenEpochManager>,
    presence: Arc<PresenceTracker>,
    metrics: Arc<dyn GatewayMetrics>,
    clock: Arc<dyn Clock>,
    config: AccessResolverConfig,
}

impl AccessResolver {
    /// Build a resolver.
    #[must_use]
    pub fn new(
        venues: Arc<dyn VenueDirectory>,
        epochs: Arc<TokenEpochManager>,
        presence: Arc<PresenceTracker>,
        metrics: Arc<dyn GatewayMetrics>,
        clock: Arc<dyn Clock>,
        config: AccessResolverConfig,
    ) -> Self {
        Self {
            venues,
            epochs,
            presence,
            metrics,
            clock,
            config,
        }
    }

    /// Check a presented code.
    ///
    /// # Errors
    /// [`AccessDenied::TokenMismatch`], [`AccessDenied::TokenExpired`],
    /// [`AccessDenied::VenueInactive`] or [`AccessDenied::VenueNotFound`] for
    /// refusals and [`AccessDenied::Unavailable`] when venue state cannot be
    /// read.
    pub async fn validate(
        &self,
        venue_id: VenueId,
        presented: &str,
    ) -> Result<TokenEpoch, AccessDenied> {
        let outcome = self.check(venue_id, presented).await;
        if let Err(denied) = &outcome {
            self.record_denial(venue_id, denied).await;
        }
        outcome
    }

    /// Open a session under `epoch_sequence`, which must still be active.
    ///
    /// A repeat within the debounce window returns the existing session.
    ///
    /// # Errors
    /// [`AccessDenied::StaleEpoch`] when the venue has rotated since, and
    /// [`AccessDenied::Presence`] when the session cannot be stored.
    pub async fn create_session(
        &self,
        venue_id: VenueId,
        visitor_id: VisitorId,
        epoch_sequence: EpochSequence,
    ) -> Result<ScanOutcome, AccessDenied> {
        let snapshot = self.epochs.snapshot(venue_id).await?;
        let active = snapshot.current.epoch_sequence;
        if active != epoch_sequence {
            return Err(AccessDenied::StaleEpoch {
                presented: epoch_sequence,
                active,
            });
        }
        let opened = self
            .presence
            .open_session(venue_id, visitor_id, epoch_sequence)
            .await?;
        Ok(ScanOutcome {
            session: opened.session,
            epoch: snapshot.current,
            debounced: opened.debounced,
        })
    }

    /// Validate a scanned code and admit the visitor under its epoch.
    ///
    /// # Errors
    /// Any error of [`AccessResolver::validate`] or
    /// [`AccessResolver::create_session`].
    pub async fn scan(
        &self,
        venue_id: VenueId,
        presented: &str,
        visitor_id: VisitorId,
    ) -> Result<ScanOutcome, AccessDenied> {
        let epoch = self.validate(venue_id, presented).await?;
        let outcome = self
            .create_session(venue_id, visitor_id, epoch.epoch_sequence)
            .await;
        match &outcome {
            Ok(scan) => debug!(
                %venue_id,
                session_id = %scan.session.id,
                debounced = scan.debounced,
                "scan admitted"
            ),
            Err(denied) => self.record_denial(venue_id, denied).await,
        }
        outcome
    }

    async fn check(&self, venue_id: VenueId, presented: &str) -> Result<TokenEpoch, AccessDenied> {
        match self.venues.find(&venue_id).await {
            Ok(Some(venue)) if venue.is_active => {}
            Ok(Some(_)) => return Err(AccessDenied::VenueInactive(venue_id)),
            Ok(None) => return Err(AccessDenied::VenueNotFound(venue_id)),
            Err(err) => return Err(AccessDenied::Unavailable(err.to_string())),
        }
        let snapshot = self.epochs.snapshot(venue_id).await?;
        classify(&snapshot, presented, self.clock.utc(), self.config.grace_window)
    }

    async fn record_denial(&self, venue_id: VenueId, denied: &AccessDenied) {
        match denied {
            AccessDenied::Unavailable(_) | AccessDenied::Presence(_) => {
                warn!(%venue_id, reason = denied.kind(), error = %denied, "scan failed");
            }
            _ => info!(%venue_id, reason = denied.kind(), "access denied"),
        }
        if let Err(error) = self.metrics.record_access_denied(denied.kind()).await {
            warn!(%error, "access denial metric not recorded");
        }
    }
}

/// Decide whether `presented` opens the venue described by `snapshot`.
fn classify(
    snapshot: &EpochSnapshot,
    presented: &str,
    now: DateTime<Utc>,
    grace_window: TimeDelta,
) -> Result<TokenEpoch, AccessDenied> {
    let current = &snapshot.current;
    if current.token_value.matches(presented) {
        if current.is_within_validity(now)
            || (snapshot.rotation_stalled && now <= current.expires_at + grace_window)
        {
            return Ok(current.clone());
        }
        return Err(AccessDenied::TokenExpired);
    }
    match &snapshot.previous {
        Some(previous)
            if previous.token_value.matches(presented)
                && previous.ran_to_expiry_before(current) =>
        {
            Err(AccessDenied::TokenExpired)
        }
        _ => Err(AccessDenied::TokenMismatch),
    }
}

#[cfg(test)]
#[path = "access_resolver_tests.rs"]
mod tests;
