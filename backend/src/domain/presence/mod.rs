//! Visitor presence: open sessions, lifetime totals and average stay.
//!
//! Counters live in memory per venue and are hydrated from the session
//! repository at start-up. Every mutation of one venue runs under that venue's
//! async lock, which also covers the repository write, so the in-memory view
//! and storage change together.
//!
//! Every close is also announced on a broadcast channel so live chat can drop
//! the connections a closed session was holding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::events::publish_best_effort;
use crate::domain::ports::{DomainEventSink, VisitorSessionRepository};
use crate::domain::{
    DomainEvent, EpochSequence, Error, SessionCloseReason, VenueId, VisitorId, VisitorSession,
    VisitorSessionId,
};

mod stay_window;
mod sweeper;

use stay_window::StayWindow;
pub use sweeper::{PresenceSweeper, SweepReport};

/// Presence timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Sessions without a heartbeat for this long are closed as idle.
    pub idle_threshold: TimeDelta,
    /// Re-scans of the same `(venue, visitor, epoch)` within this window
    /// return the existing session.
    pub debounce_window: TimeDelta,
    /// Trailing window for the average stay.
    pub stay_window: TimeDelta,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            idle_threshold: TimeDelta::minutes(10),
            debounce_window: TimeDelta::seconds(30),
            stay_window: TimeDelta::hours(24),
        }
    }
}

/// Point-in-time presence figures for one venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceCounters {
    /// Venue.
    pub venue_id: VenueId,
    /// Open sessions seen within the idle threshold.
    pub active_visitors: u64,
    /// Distinct visitors ever seen.
    pub total_visitors: u64,
    /// Mean stay of sessions closed inside the trailing window.
    pub average_stay: Option<TimeDelta>,
    /// Sessions closed inside the trailing window.
    pub closed_in_window: u64,
}

/// Closures buffered per subscriber before it starts lagging.
const CLOSURE_CAPACITY: usize = 256;

/// A session that stopped counting as present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClosure {
    /// Venue the session belonged to.
    pub venue_id: VenueId,
    /// The closed session.
    pub session_id: VisitorSessionId,
    /// Why it closed.
    pub reason: SessionCloseReason,
}

/// Result of opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedSession {
    /// The session now counted as present.
    pub session: VisitorSession,
    /// `true` when an existing session was returned by the debounce rule.
    pub debounced: bool,
}

/// Presence failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// No such session.
    #[error("session {0} not found")]
    SessionNotFound(VisitorSessionId),
    /// The session already closed.
    #[error("session {0} is closed")]
    SessionClosed(VisitorSessionId),
    /// The session repository failed.
    #[error("session storage failed: {0}")]
    Storage(String),
}

impl From<PresenceError> for Error {
    fn from(value: PresenceError) -> Self {
        match value {
            PresenceError::SessionNotFound(_) => Self::not_found("session not found"),
            PresenceError::SessionClosed(_) => Self::conflict("session is closed"),
            PresenceError::Storage(message) => Self::service_unavailable(message),
        }
    }
}

struct VenuePresence {
    open: HashMap<VisitorSessionId, VisitorSession>,
    joins: HashMap<(VisitorId, EpochSequence), VisitorSessionId>,
    total_visitors: u64,
    stays: StayWindow,
}

impl VenuePresence {
    fn new(stay_window: TimeDelta) -> Self {
        Self {
            open: HashMap::new(),
            joins: HashMap::new(),
            total_visitors: 0,
            stays: StayWindow::new(stay_window),
        }
    }

    fn admit(&mut self, session: VisitorSession) {
        self.joins.insert(
            (session.visitor_id, session.epoch_sequence_joined),
            session.id,
        );
        self.open.insert(session.id, session);
    }

    fn evict(&mut self, session_id: &VisitorSessionId) -> Option<VisitorSession> {
        let session = self.open.remove(session_id)?;
        let key = (session.visitor_id, session.epoch_sequence_joined);
        if self.joins.get(&key) == Some(session_id) {
            self.joins.remove(&key);
        }
        Some(session)
    }
}

/// Tracks who is present at each venue.
pub struct PresenceTracker {
    sessions: Arc<dyn VisitorSessionRepository>,
    events: Arc<dyn DomainEventSink>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
    venues: Mutex<HashMap<VenueId, Arc<AsyncMutex<VenuePresence>>>>,
    index: Mutex<HashMap<VisitorSessionId, VenueId>>,
    closures: broadcast::Sender<SessionClosure>,
}

impl PresenceTracker {
    /// Build an empty tracker; call [`PresenceTracker::hydrate`] before use.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn VisitorSessionRepository>,
        events: Arc<dyn DomainEventSink>,
        clock: Arc<dyn Clock>,
        config: PresenceConfig,
    ) -> Self {
        Self {
            sessions,
            events,
            clock,
            config,
            venues: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
            closures: broadcast::channel(CLOSURE_CAPACITY).0,
        }
    }

    /// Receive every session closure from now on.
    ///
    /// A subscriber that falls more than a few hundred closures behind gets
    /// [`broadcast::error::RecvError::Lagged`] and should re-check the
    /// sessions it cares about with [`PresenceTracker::find_open`].
    #[must_use]
    pub fn subscribe_closures(&self) -> broadcast::Receiver<SessionClosure> {
        self.closures.subscribe()
    }

    /// Rebuild counters from the session repository.
    ///
    /// Returns the number of open sessions restored.
    ///
    /// # Errors
    /// [`PresenceError::Storage`] when the repository cannot be read.
    pub async fn hydrate(&self) -> Result<usize, PresenceError> {
        let storage = |err: crate::domain::ports::VisitorSessionRepositoryError| {
            PresenceError::Storage(err.to_string())
        };
        let open = self.sessions.list_open().await.map_err(storage)?;
        let totals = self.sessions.visitor_totals().await.map_err(storage)?;
        let since = self.clock.utc() - self.config.stay_window;
        let closed = self.sessions.list_closed_since(since).await.map_err(storage)?;

        let restored = open.len();
        for total in totals {
            self.venue(total.venue_id).lock().await.total_visitors = total.total_visitors;
        }
        for session in closed {
            if let Some(left_at) = session.left_at {
                self.venue(session.venue_id)
                    .lock()
                    .await
                    .stays
                    .record(left_at, left_at - session.joined_at);
            }
        }
        for session in open {
            self.index_session(session.id, session.venue_id);
            self.venue(session.venue_id).lock().await.admit(session);
        }
        info!(open_sessions = restored, "presence hydrated");
        Ok(restored)
    }

    /// Open a session, or return the debounced one for a repeat scan.
    ///
    /// # Errors
    /// [`PresenceError::Storage`] when the session cannot be persisted; the
    /// counters are left untouched.
    pub async fn open_session(
        &self,
        venue_id: VenueId,
        visitor_id: VisitorId,
        epoch_sequence: EpochSequence,
    ) -> Result<OpenedSession, PresenceError> {
        let venue = self.venue(venue_id);
        let mut presence = venue.lock().await;
        let now = self.clock.utc();

        if let Some(existing) = presence
            .joins
            .get(&(visitor_id, epoch_sequence))
            .and_then(|id| presence.open.get(id))
            .filter(|session| now - session.joined_at <= self.config.debounce_window)
        {
            return Ok(OpenedSession {
                session: existing.clone(),
                debounced: true,
            });
        }

        let session = VisitorSession::open(venue_id, visitor_id, epoch_sequence, now);
        let outcome = self
            .sessions
            .insert(&session)
            .await
            .map_err(|err| PresenceError::Storage(err.to_string()))?;
        if outcome.first_visit {
            presence.total_visitors = presence.total_visitors.saturating_add(1);
        }
        presence.admit(session.clone());
        self.index_session(session.id, venue_id);
        drop(presence);

        info!(
            %venue_id,
            session_id = %session.id,
            %epoch_sequence,
            first_visit = outcome.first_visit,
            "visitor session opened"
        );
        publish_best_effort(
            self.events.as_ref(),
            DomainEvent::SessionOpened {
                venue_id,
                session_id: session.id,
                visitor_id,
                epoch_sequence,
                at: now,
            },
        )
        .await;
        Ok(OpenedSession {
            session,
            debounced: false,
        })
    }

    /// Open session by id, if it is still counted as present.
    pub async fn find_open(&self, session_id: VisitorSessionId) -> Option<VisitorSession> {
        let venue_id = self.indexed_venue(session_id)?;
        self.venue(venue_id)
            .lock()
            .await
            .open
            .get(&session_id)
            .cloned()
    }

    /// Refresh a session's heartbeat watermark.
    ///
    /// # Errors
    /// [`PresenceError::SessionNotFound`] or [`PresenceError::SessionClosed`]
    /// when the session is not open.
    pub async fn heartbeat(
        &self,
        session_id: VisitorSessionId,
    ) -> Result<VisitorSession, PresenceError> {
        let Some(venue_id) = self.indexed_venue(session_id) else {
            return Err(self.not_open(session_id).await);
        };
        let venue = self.venue(venue_id);
        let mut presence = venue.lock().await;
        let now = self.clock.utc();
        let touched = presence.open.get_mut(&session_id).map(|session| {
            session.touch(now);
            session.clone()
        });
        let Some(session) = touched else {
            drop(presence);
            return Err(self.not_open(session_id).await);
        };
        if let Err(error) = self.sessions.touch(&session_id, now).await {
            warn!(%session_id, %error, "heartbeat not persisted");
        }
        Ok(session)
    }

    /// Close a session because the visitor left.
    ///
    /// # Errors
    /// [`PresenceError::SessionNotFound`], [`PresenceError::SessionClosed`]
    /// or [`PresenceError::Storage`].
    pub async fn leave(&self, session_id: VisitorSessionId) -> Result<TimeDelta, PresenceError> {
        self.close(session_id, SessionCloseReason::ExplicitLeave)
            .await
    }

    /// Close a session for `reason`, returning the stay length.
    ///
    /// # Errors
    /// As for [`PresenceTracker::leave`].
    pub async fn close(
        &self,
        session_id: VisitorSessionId,
        reason: SessionCloseReason,
    ) -> Result<TimeDelta, PresenceError> {
        let Some(venue_id) = self.indexed_venue(session_id) else {
            return Err(self.not_open(session_id).await);
        };
        let venue = self.venue(venue_id);
        let mut presence = venue.lock().await;
        match self
            .close_locked(&mut presence, session_id, reason, self.clock.utc())
            .await?
        {
            Some(stay) => Ok(stay),
            None => {
                drop(presence);
                Err(self.not_open(session_id).await)
            }
        }
    }

    /// Current figures for a venue. Unknown venues report zeros.
    pub async fn counters(&self, venue_id: VenueId) -> PresenceCounters {
        let venue = self.venue(venue_id);
        let mut presence = venue.lock().await;
        let now = self.clock.utc();
        let active = presence
            .open
            .values()
            .filter(|session| !session.is_idle(now, self.config.idle_threshold))
            .count();
        let average_stay = presence.stays.mean(now);
        PresenceCounters {
            venue_id,
            active_visitors: u64::try_from(active).unwrap_or(u64::MAX),
            total_visitors: presence.total_visitors,
            average_stay,
            closed_in_window: u64::try_from(presence.stays.len()).unwrap_or(u64::MAX),
        }
    }

    /// Close idle sessions and sessions that outlived two rotations.
    ///
    /// `active_sequence` reports each venue's active epoch; venues it does not
    /// know are only checked for idleness.
    pub async fn sweep<F>(&self, active_sequence: F) -> SweepReport
    where
        F: Fn(VenueId) -> Option<EpochSequence>,
    {
        let venues: Vec<(VenueId, Arc<AsyncMutex<VenuePresence>>)> = self
            .venues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, venue)| (*id, Arc::clone(venue)))
            .collect();
        let mut report = SweepReport::default();

        for (venue_id, venue) in venues {
            let active = active_sequence(venue_id);
            let mut presence = venue.lock().await;
            let now = self.clock.utc();
            let doomed: Vec<(VisitorSessionId, SessionCloseReason)> = presence
                .open
                .values()
                .filter_map(|session| {
                    if active.is_some_and(|seq| session.outlived_epochs(seq)) {
                        Some((session.id, SessionCloseReason::EpochExpiredTwice))
                    } else if session.is_idle(now, self.config.idle_threshold) {
                        Some((session.id, SessionCloseReason::IdleTimeout))
                    } else {
                        None
                    }
                })
                .collect();

            for (session_id, reason) in doomed {
                match self
                    .close_locked(&mut presence, session_id, reason, now)
                    .await
                {
                    Ok(Some(_)) => report.record(reason),
                    Ok(None) => {}
                    Err(error) => {
                        warn!(%venue_id, %session_id, %error, "sweep could not close session");
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    async fn close_locked(
        &self,
        presence: &mut VenuePresence,
        session_id: VisitorSessionId,
        reason: SessionCloseReason,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeDelta>, PresenceError> {
        let Some(session) = presence.open.get(&session_id) else {
            return Ok(None);
        };
        let venue_id = session.venue_id;
        let closed_now = self
            .sessions
            .close(&session_id, reason, now)
            .await
            .map_err(|err| PresenceError::Storage(err.to_string()))?;

        let Some(mut session) = presence.evict(&session_id) else {
            return Ok(None);
        };
        self.unindex_session(session_id);
        self.announce(SessionClosure {
            venue_id,
            session_id,
            reason,
        });
        let stay = match session.close(reason, now) {
            Ok(stay) => stay,
            Err(_) => return Ok(None),
        };
        if !closed_now {
            warn!(%venue_id, %session_id, "session was already closed in storage");
            return Ok(Some(stay));
        }
        presence.stays.record(now, stay);

        info!(
            %venue_id,
            %session_id,
            reason = reason.as_str(),
            stay_seconds = stay.num_seconds(),
            "visitor session closed"
        );
        publish_best_effort(
            self.events.as_ref(),
            DomainEvent::SessionClosed {
                venue_id,
                session_id,
                reason,
                stay_seconds: stay.num_seconds(),
                at: now,
            },
        )
        .await;
        Ok(Some(stay))
    }

    fn announce(&self, closure: SessionClosure) {
        if self.closures.send(closure).is_err() {
            debug!(session_id = %closure.session_id, "no closure subscribers");
        }
    }

    async fn not_open(&self, session_id: VisitorSessionId) -> PresenceError {
        match self.sessions.find(&session_id).await {
            Ok(Some(_)) => PresenceError::SessionClosed(session_id),
            Ok(None) => PresenceError::SessionNotFound(session_id),
            Err(err) => PresenceError::Storage(err.to_string()),
        }
    }

    fn venue(&self, venue_id: VenueId) -> Arc<AsyncMutex<VenuePresence>> {
        let mut venues = self.venues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(venues.entry(venue_id).or_insert_with(|| {
            Arc::new(AsyncMutex::new(VenuePresence::new(self.config.stay_window)))
        }))
    }

    fn indexed_venue(&self, session_id: VisitorSessionId) -> Option<VenueId> {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .copied()
    }

    fn index_session(&self, session_id: VisitorSessionId, venue_id: VenueId) {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, venue_id);
    }

    fn unindex_session(&self, session_id: VisitorSessionId) {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
    }
}

#[cfg(test)]
mod tests;
