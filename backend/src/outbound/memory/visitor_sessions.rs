//! In-memory visitor session store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::ports::{
    SessionInsertOutcome, VenueVisitorTotal, VisitorSessionRepository,
    VisitorSessionRepositoryError,
};
use crate::domain::{SessionCloseReason, VenueId, VisitorId, VisitorSession, VisitorSessionId};

use super::lock;

#[derive(Debug, Default)]
struct SessionTables {
    sessions: HashMap<VisitorSessionId, VisitorSession>,
    visitors: HashMap<VenueId, HashSet<VisitorId>>,
}

/// Session store keeping every session ever opened.
#[derive(Debug, Default)]
pub struct InMemoryVisitorSessionRepository {
    tables: Mutex<SessionTables>,
}

impl InMemoryVisitorSessionRepository {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VisitorSessionRepository for InMemoryVisitorSessionRepository {
    async fn insert(
        &self,
        session: &VisitorSession,
    ) -> Result<SessionInsertOutcome, VisitorSessionRepositoryError> {
        let mut tables = lock(&self.tables);
        if tables.sessions.contains_key(&session.id) {
            return Err(VisitorSessionRepositoryError::query(format!(
                "session {} already exists",
                session.id
            )));
        }
        let first_visit = tables
            .visitors
            .entry(session.venue_id)
            .or_default()
            .insert(session.visitor_id);
        tables.sessions.insert(session.id, session.clone());
        Ok(SessionInsertOutcome { first_visit })
    }

    async fn find(
        &self,
        session_id: &VisitorSessionId,
    ) -> Result<Option<VisitorSession>, VisitorSessionRepositoryError> {
        Ok(lock(&self.tables).sessions.get(session_id).cloned())
    }

    async fn touch(
        &self,
        session_id: &VisitorSessionId,
        at: DateTime<Utc>,
    ) -> Result<(), VisitorSessionRepositoryError> {
        if let Some(session) = lock(&self.tables).sessions.get_mut(session_id) {
            if session.is_open() {
                session.touch(at);
            }
        }
        Ok(())
    }

    async fn close(
        &self,
        session_id: &VisitorSessionId,
        reason: SessionCloseReason,
        at: DateTime<Utc>,
    ) -> Result<bool, VisitorSessionRepositoryError> {
        Ok(lock(&self.tables)
            .sessions
            .get_mut(session_id)
            .is_some_and(|session| session.close(reason, at).is_ok()))
    }

    async fn list_open(&self) -> Result<Vec<VisitorSession>, VisitorSessionRepositoryError> {
        Ok(lock(&self.tables)
            .sessions
            .values()
            .filter(|session| session.is_open())
            .cloned()
            .collect())
    }

    async fn list_closed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VisitorSession>, VisitorSessionRepositoryError> {
        let mut closed: Vec<VisitorSession> = lock(&self.tables)
            .sessions
            .values()
            .filter(|session| session.left_at.is_some_and(|left| left >= since))
            .cloned()
            .collect();
        closed.sort_by_key(|session| session.left_at);
        Ok(closed)
    }

    async fn visitor_totals(&self) -> Result<Vec<VenueVisitorTotal>, VisitorSessionRepositoryError> {
        Ok(lock(&self.tables)
            .visitors
            .iter()
            .map(|(venue_id, visitors)| VenueVisitorTotal {
                venue_id: *venue_id,
                total_visitors: u64::try_from(visitors.len()).unwrap_or(u64::MAX),
            })
            .collect())
    }
}
