//! Port for visitor session persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{SessionCloseReason, VenueId, VisitorSession, VisitorSessionId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by visitor session repository adapters.
    pub enum VisitorSessionRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } =>
            "visitor session repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } =>
            "visitor session repository query failed: {message}",
    }
}

/// Outcome of persisting a newly opened session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInsertOutcome {
    /// `true` when the visitor had never opened a session at this venue.
    pub first_visit: bool,
}

/// Per-venue count of distinct visitors ever seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VenueVisitorTotal {
    /// Venue.
    pub venue_id: VenueId,
    /// Distinct visitor ids.
    pub total_visitors: u64,
}

/// Durable session storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisitorSessionRepository: Send + Sync {
    /// Store a newly opened session.
    async fn insert(
        &self,
        session: &VisitorSession,
    ) -> Result<SessionInsertOutcome, VisitorSessionRepositoryError>;

    /// Find a session by id.
    async fn find(
        &self,
        session_id: &VisitorSessionId,
    ) -> Result<Option<VisitorSession>, VisitorSessionRepositoryError>;

    /// Advance `last_seen_at` of an open session.
    async fn touch(
        &self,
        session_id: &VisitorSessionId,
        at: DateTime<Utc>,
    ) -> Result<(), VisitorSessionRepositoryError>;

    /// Close an open session.
    ///
    /// Returns `false` when the session was already closed (or unknown), so
    /// concurrent closers agree on exactly one winner.
    async fn close(
        &self,
        session_id: &VisitorSessionId,
        reason: SessionCloseReason,
        at: DateTime<Utc>,
    ) -> Result<bool, VisitorSessionRepositoryError>;

    /// Every open session, used to hydrate presence at start-up.
    async fn list_open(&self) -> Result<Vec<VisitorSession>, VisitorSessionRepositoryError>;

    /// Sessions closed at or after `since`, oldest first.
    async fn list_closed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VisitorSession>, VisitorSessionRepositoryError>;

    /// Distinct visitor totals for every venue with sessions.
    async fn visitor_totals(&self) -> Result<Vec<VenueVisitorTotal>, VisitorSessionRepositoryError>;
}
