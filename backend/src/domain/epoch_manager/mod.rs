//! Authoritative rotating access token per venue.
//!
//! The manager keeps one [`slot::EpochSlot`] per venue: a writer lock that
//! serialises activation and rotation, plus a published [`EpochSnapshot`] so
//! reads never wait on the writer. Failed rotations are retried with jittered
//! exponential backoff outside the writer lock; when the budget runs out the
//! venue is marked `rotation_stalled` and access checks apply their grace
//! window until a rotation succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::events::publish_best_effort;
use crate::domain::ports::{
    DomainEventSink, GatewayMetrics, TokenEpochRepository, TokenEpochRepositoryError,
    TokenGenerator, VenueDirectory,
};
use crate::domain::rotation_scheduler::{DueRotation, RotationScheduleHandle};
use crate::domain::{
    DomainEvent, EpochSequence, EpochSnapshot, Error, RotationTrigger, TokenEpoch, TokenValue,
    TokenWidth, Venue, VenueId,
};

mod retry;
mod slot;

pub use retry::{
    BackoffJitter, RandomJitter, RetryPolicy, RetryRuntime, RetrySleeper, TokioSleeper,
};
use slot::EpochSlot;

/// Manager configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEpochManagerConfig {
    /// Digits per token.
    pub token_width: TokenWidth,
    /// Longest wait for a venue's writer lock.
    pub writer_timeout: Duration,
    /// Retry budget for failed rotations.
    pub retry: RetryPolicy,
    /// Draws allowed per attempt while the generator repeats the previous token.
    pub max_token_draws: u32,
}

impl Default for TokenEpochManagerConfig {
    fn default() -> Self {
        Self {
            token_width: TokenWidth::default(),
            writer_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            max_token_draws: 8,
        }
    }
}

/// Port bundle required by the manager.
pub struct TokenEpochManagerPorts {
    /// Venue configuration.
    pub venues: Arc<dyn VenueDirectory>,
    /// Durable epoch history.
    pub epochs: Arc<dyn TokenEpochRepository>,
    /// Token entropy.
    pub generator: Arc<dyn TokenGenerator>,
    /// Domain event sink.
    pub events: Arc<dyn DomainEventSink>,
    /// Metrics exporter.
    pub metrics: Arc<dyn GatewayMetrics>,
}

/// Rotation failures surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RotationError {
    /// The venue directory does not know the venue.
    #[error("venue {0} does not exist")]
    VenueNotFound(VenueId),
    /// The venue is not accepting visitors.
    #[error("venue {0} is inactive")]
    VenueInactive(VenueId),
    /// The venue's writer lock stayed busy past the configured timeout.
    #[error("venue {0} is busy rotating")]
    WriterBusy(VenueId),
    /// Every attempt failed; the venue is now flagged as stalled.
    #[error("rotation for venue {venue_id} stalled after {attempts} attempts: {reason}")]
    Stalled {
        /// Venue.
        venue_id: VenueId,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },
}

impl From<RotationError> for Error {
    fn from(value: RotationError) -> Self {
        match value {
            RotationError::VenueNotFound(_) => Self::not_found("venue not found"),
            RotationError::VenueInactive(_) => Self::forbidden("venue is not accepting visitors"),
            RotationError::WriterBusy(_) => {
                Self::service_unavailable("venue is busy, try again shortly")
            }
            RotationError::Stalled { .. } => {
                Self::service_unavailable("access code rotation is temporarily unavailable")
            }
        }
    }
}

/// What a scheduled tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new epoch became active.
    Rotated(TokenEpoch),
    /// Another rotation already moved past the scheduled sequence.
    AlreadyAdvanced(EpochSequence),
    /// The active epoch has not expired yet; run again at the given instant.
    NotDue(DateTime<Utc>),
    /// The venue is unknown or inactive; nothing to rotate.
    VenueInactive,
}

#[derive(Debug, Clone, Copy)]
enum Intent {
    Activate,
    Advance {
        trigger: RotationTrigger,
        expected: Option<EpochSequence>,
    },
}

enum AttemptError {
    Retryable(String),
    Fatal(RotationError),
}

/// Single authority over every venue's access token.
pub struct TokenEpochManager {
    venues: Arc<dyn VenueDirectory>,
    epochs: Arc<dyn TokenEpochRepository>,
    generator: Arc<dyn TokenGenerator>,
    events: Arc<dyn DomainEventSink>,
    metrics: Arc<dyn GatewayMetrics>,
    clock: Arc<dyn Clock>,
    runtime: RetryRuntime,
    config: TokenEpochManagerConfig,
    schedule: RotationScheduleHandle,
    slots: Mutex<HashMap<VenueId, Arc<EpochSlot>>>,
}

impl TokenEpochManager {
    /// Build a manager with the default retry runtime.
    #[must_use]
    pub fn new(
        ports: TokenEpochManagerPorts,
        clock: Arc<dyn Clock>,
        config: TokenEpochManagerConfig,
        schedule: RotationScheduleHandle,
    ) -> Self {
        Self::with_runtime(ports, clock, RetryRuntime::default(), config, schedule)
    }

    /// Build a manager with injected retry helpers.
    #[must_use]
    pub fn with_runtime(
        ports: TokenEpochManagerPorts,
        clock: Arc<dyn Clock>,
        runtime: RetryRuntime,
        config: TokenEpochManagerConfig,
        schedule: RotationScheduleHandle,
    ) -> Self {
        Self {
            venues: ports.venues,
            epochs: ports.epochs,
            generator: ports.generator,
            events: ports.events,
            metrics: ports.metrics,
            clock,
            runtime,
            config,
            schedule,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Active epoch for a venue.
    ///
    /// # Errors
    /// See [`TokenEpochManager::snapshot`].
    pub async fn current_epoch(&self, venue_id: VenueId) -> Result<TokenEpoch, RotationError> {
        Ok(self.snapshot(venue_id).await?.current)
    }

    /// Committed rotation state for a venue.
    ///
    /// Served from the published snapshot without touching the writer. The
    /// first read of a venue loads its history; an active venue without
    /// history is activated with epoch 1.
    ///
    /// # Errors
    /// [`RotationError::VenueNotFound`] or [`RotationError::VenueInactive`]
    /// when a venue without history cannot be activated, and
    /// [`RotationError::Stalled`] when loading keeps failing.
    pub async fn snapshot(&self, venue_id: VenueId) -> Result<EpochSnapshot, RotationError> {
        let slot = self.slot(venue_id);
        if let Some(snapshot) = slot.snapshot() {
            return Ok(snapshot);
        }
        self.run_with_retry(venue_id, Intent::Activate)
            .await
            .map(|(snapshot, _)| snapshot)
    }

    /// Published snapshot without loading anything.
    #[must_use]
    pub fn peek(&self, venue_id: VenueId) -> Option<EpochSnapshot> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&venue_id)
            .and_then(|slot| slot.snapshot())
    }

    /// Subscribe to committed snapshots for a venue.
    #[must_use]
    pub fn watch(&self, venue_id: VenueId) -> watch::Receiver<Option<EpochSnapshot>> {
        self.slot(venue_id).subscribe()
    }

    /// Rotate immediately.
    ///
    /// Returns the newly active epoch. If another rotation commits while this
    /// one is retrying, that epoch is returned instead.
    ///
    /// # Errors
    /// Fails for unknown or inactive venues, when the writer stays busy, and
    /// with [`RotationError::Stalled`] once the retry budget is spent.
    pub async fn rotate_now(&self, venue_id: VenueId) -> Result<TokenEpoch, RotationError> {
        let intent = Intent::Advance {
            trigger: RotationTrigger::Manual,
            expected: None,
        };
        let (snapshot, _) = self.run_with_retry(venue_id, intent).await?;
        Ok(snapshot.current)
    }

    /// Rotate because `due` reached its expiry.
    ///
    /// Idempotent: does nothing once the venue has moved past `due`.
    ///
    /// # Errors
    /// [`RotationError::WriterBusy`] and [`RotationError::Stalled`].
    pub async fn scheduled_tick(
        &self,
        venue_id: VenueId,
        due: EpochSequence,
    ) -> Result<TickOutcome, RotationError> {
        let snapshot = match self.snapshot(venue_id).await {
            Ok(snapshot) => snapshot,
            Err(RotationError::VenueInactive(_) | RotationError::VenueNotFound(_)) => {
                return Ok(TickOutcome::VenueInactive);
            }
            Err(err) => return Err(err),
        };
        if snapshot.current.epoch_sequence != due {
            return Ok(TickOutcome::AlreadyAdvanced(snapshot.current.epoch_sequence));
        }
        if self.clock.utc() < snapshot.current.expires_at {
            return Ok(TickOutcome::NotDue(snapshot.current.expires_at));
        }

        let intent = Intent::Advance {
            trigger: RotationTrigger::Scheduled,
            expected: Some(due),
        };
        match self.run_with_retry(venue_id, intent).await {
            Ok((snapshot, true)) => Ok(TickOutcome::Rotated(snapshot.current)),
            Ok((snapshot, false)) => Ok(TickOutcome::AlreadyAdvanced(
                snapshot.current.epoch_sequence,
            )),
            Err(RotationError::VenueInactive(_) | RotationError::VenueNotFound(_)) => {
                Ok(TickOutcome::VenueInactive)
            }
            Err(err) => Err(err),
        }
    }

    /// Load or activate every active venue and report when each is due.
    ///
    /// Venues that fail to load are logged and skipped; the scheduler calls
    /// this again on its next resync.
    pub async fn pending_rotations(&self) -> Vec<DueRotation> {
        let venues = match self.venues.list_active().await {
            Ok(venues) => venues,
            Err(error) => {
                warn!(%error, "venue directory unavailable; rotation schedule not refreshed");
                return Vec::new();
            }
        };
        let mut due = Vec::with_capacity(venues.len());
        for venue in venues {
            match self.snapshot(venue.id).await {
                Ok(snapshot) => due.push(DueRotation::for_epoch(&snapshot.current)),
                Err(error) => warn!(venue_id = %venue.id, %error, "venue epoch not loaded"),
            }
        }
        due
    }

    fn slot(&self, venue_id: VenueId) -> Arc<EpochSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(venue_id)
                .or_insert_with(|| Arc::new(EpochSlot::new())),
        )
    }

    async fn run_with_retry(
        &self,
        venue_id: VenueId,
        mut intent: Intent,
    ) -> Result<(EpochSnapshot, bool), RotationError> {
        let attempts = self.config.retry.attempts();
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match self.attempt(venue_id, &mut intent).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(message)) => {
                    warn!(%venue_id, attempt, error = %message, "epoch rotation attempt failed");
                    reason = message;
                    if attempt < attempts {
                        let base = self.config.retry.base_delay(attempt);
                        let delay =
                            self.runtime
                                .jitter
                                .jittered_delay(base, attempt, self.clock.utc());
                        self.runtime.sleeper.sleep(delay).await;
                    }
                }
            }
        }

        self.mark_stalled(venue_id).await;
        Err(RotationError::Stalled {
            venue_id,
            attempts,
            reason,
        })
    }

    async fn attempt(
        &self,
        venue_id: VenueId,
        intent: &mut Intent,
    ) -> Result<(EpochSnapshot, bool), AttemptError> {
        let slot = self.slot(venue_id);
        let Some(_writer) = slot.lock_writer(self.config.writer_timeout).await else {
            return Err(AttemptError::Fatal(RotationError::WriterBusy(venue_id)));
        };

        let loaded = match slot.snapshot() {
            Some(snapshot) => Some(snapshot),
            None => self.load(&slot, venue_id).await?,
        };

        let Some(current) = loaded else {
            let venue = self.require_active(venue_id).await?;
            let first = self.draw_epoch(&venue, None)?;
            let snapshot = self
                .commit(&slot, None, first, RotationTrigger::Activation)
                .await?;
            return Ok((snapshot, true));
        };

        match *intent {
            Intent::Activate => Ok((current, false)),
            Intent::Advance {
                expected: Some(expected),
                ..
            } if current.current.epoch_sequence != expected => Ok((current, false)),
            Intent::Advance { trigger, .. } => {
                *intent = Intent::Advance {
                    trigger,
                    expected: Some(current.current.epoch_sequence),
                };
                let venue = self.require_active(venue_id).await?;
                let next = self.draw_epoch(&venue, Some(&current.current))?;
                let snapshot = self.commit(&slot, Some(&current), next, trigger).await?;
                Ok((snapshot, true))
            }
        }
    }

    async fn load(
        &self,
        slot: &EpochSlot,
        venue_id: VenueId,
    ) -> Result<Option<EpochSnapshot>, AttemptError> {
        let recent = self
            .epochs
            .recent(&venue_id, 2)
            .await
            .map_err(|err| AttemptError::Retryable(err.to_string()))?;
        let mut recent = recent.into_iter();
        let Some(current) = recent.next() else {
            return Ok(None);
        };
        let snapshot = EpochSnapshot {
            current,
            previous: recent.next(),
            rotation_stalled: false,
        };
        slot.publish(snapshot.clone());
        self.schedule.notify(DueRotation::for_epoch(&snapshot.current));
        Ok(Some(snapshot))
    }

    async fn require_active(&self, venue_id: VenueId) -> Result<Venue, AttemptError> {
        match self.venues.find(&venue_id).await {
            Ok(Some(venue)) if venue.is_active => Ok(venue),
            Ok(Some(_)) => Err(AttemptError::Fatal(RotationError::VenueInactive(venue_id))),
            Ok(None) => Err(AttemptError::Fatal(RotationError::VenueNotFound(venue_id))),
            Err(err) => Err(AttemptError::Retryable(err.to_string())),
        }
    }

    fn draw_epoch(
        &self,
        venue: &Venue,
        previous: Option<&TokenEpoch>,
    ) -> Result<TokenEpoch, AttemptError> {
        let token_value = self.draw_token(previous.map(|epoch| &epoch.token_value))?;
        let generated_at = self.clock.utc();
        Ok(TokenEpoch {
            venue_id: venue.id,
            token_value,
            epoch_sequence: previous
                .map_or(EpochSequence::FIRST, |epoch| epoch.epoch_sequence.next()),
            generated_at,
            expires_at: venue.rotation_frequency.expiry_after(generated_at),
        })
    }

    fn draw_token(&self, previous: Option<&TokenValue>) -> Result<TokenValue, AttemptError> {
        for _ in 0..self.config.max_token_draws.max(1) {
            let token = self
                .generator
                .generate(self.config.token_width)
                .map_err(|err| AttemptError::Retryable(err.to_string()))?;
            if previous != Some(&token) {
                return Ok(token);
            }
        }
        Err(AttemptError::Retryable(
            "token generator kept repeating the previous token".to_owned(),
        ))
    }

    async fn commit(
        &self,
        slot: &EpochSlot,
        current: Option<&EpochSnapshot>,
        next: TokenEpoch,
        trigger: RotationTrigger,
    ) -> Result<EpochSnapshot, AttemptError> {
        let venue_id = next.venue_id;
        let expected = current.map(|snapshot| snapshot.current.epoch_sequence);

        if let Err(err) = self.epochs.append(expected, &next).await {
            if matches!(err, TokenEpochRepositoryError::Conflict { .. }) {
                // History moved underneath us; refresh so the next attempt
                // compares against what is actually stored.
                if let Err(AttemptError::Retryable(reload)) = self.load(slot, venue_id).await {
                    warn!(%venue_id, error = %reload, "epoch reload after conflict failed");
                }
            }
            return Err(AttemptError::Retryable(err.to_string()));
        }

        let snapshot = match current {
            Some(snapshot) => snapshot.advanced(next),
            None => EpochSnapshot::initial(next),
        };
        slot.publish(snapshot.clone());
        self.schedule
            .notify(DueRotation::for_epoch(&snapshot.current));

        let epoch = &snapshot.current;
        info!(
            %venue_id,
            epoch_sequence = %epoch.epoch_sequence,
            trigger = trigger.as_str(),
            expires_at = %epoch.expires_at,
            "token epoch rotated"
        );
        publish_best_effort(
            self.events.as_ref(),
            DomainEvent::EpochRotated {
                venue_id,
                epoch_sequence: epoch.epoch_sequence,
                trigger,
                expires_at: epoch.expires_at,
            },
        )
        .await;
        if let Err(error) = self.metrics.record_rotation(trigger).await {
            warn!(%error, "rotation metric not recorded");
        }
        Ok(snapshot)
    }

    async fn mark_stalled(&self, venue_id: VenueId) {
        let slot = self.slot(venue_id);
        let Some(_writer) = slot.lock_writer(self.config.writer_timeout).await else {
            return;
        };
        let Some(snapshot) = slot.snapshot() else {
            error!(%venue_id, "venue has no epoch and activation keeps failing");
            return;
        };
        if snapshot.rotation_stalled {
            return;
        }
        slot.publish(snapshot.stalled());
        error!(
            %venue_id,
            epoch_sequence = %snapshot.current.epoch_sequence,
            "token rotation stalled; grace window applies"
        );
        if let Err(error) = self.metrics.record_rotation_stalled().await {
            warn!(%error, "stall metric not recorded");
        }
    }
}
