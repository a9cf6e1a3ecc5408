//! Test utilities for the gateway crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`); only
//! compiled for tests or with the `test-support` feature.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use uuid::Uuid;

use crate::domain::ports::{
    ChatHistoryStore, ChatHistoryStoreError, DomainEventSink, DomainEventSinkError,
    TokenGenerator, TokenGeneratorError, VisitorAuthError, VisitorAuthenticator,
};
use crate::domain::{
    BackoffJitter, ChatMessage, DomainEvent, RetrySleeper, SequenceNumber, TokenValue,
    TokenWidth, VenueId, VisitorId,
};
use crate::outbound::memory::InMemoryChatHistoryStore;

pub mod harness;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 2026-03-01 at `hour:minute` UTC.
///
/// # Panics
/// Panics for out-of-range hours or minutes.
#[must_use]
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, 0).single() {
        Some(instant) => instant,
        None => panic!("invalid test time {hour}:{minute}"),
    }
}

/// Clock tests move by hand.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    /// Clock frozen at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Jump to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *guard(&self.0) = instant;
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        *guard(&self.0) += delta;
    }

    /// Move forward by whole minutes.
    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(TimeDelta::minutes(minutes));
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *guard(&self.0)
    }
}

/// Sleeper that returns at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSleeper;

#[async_trait]
impl RetrySleeper for ImmediateSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

/// Sleeper that records requested delays and returns at once.
#[derive(Debug, Default)]
pub struct RecordingSleeper(Mutex<Vec<Duration>>);

impl RecordingSleeper {
    /// Delays requested so far.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        guard(&self.0).clone()
    }
}

#[async_trait]
impl RetrySleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        guard(&self.0).push(duration);
    }
}

/// Jitter that returns the base delay unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        base
    }
}

/// Token generator replaying scripted draws, then counting up from 1.
#[derive(Debug, Default)]
pub struct ScriptedTokenGenerator {
    script: Mutex<VecDeque<Result<u64, TokenGeneratorError>>>,
    counter: Mutex<u64>,
}

impl ScriptedTokenGenerator {
    /// Generator that first yields `numbers` in order.
    #[must_use]
    pub fn new(numbers: impl IntoIterator<Item = u64>) -> Self {
        Self {
            script: Mutex::new(numbers.into_iter().map(Ok).collect()),
            counter: Mutex::new(0),
        }
    }

    /// Queue `count` failures ahead of the remaining script.
    pub fn fail_next(&self, count: usize) {
        let mut script = guard(&self.script);
        for _ in 0..count {
            script.push_front(Err(TokenGeneratorError::unavailable("entropy exhausted")));
        }
    }
}

impl TokenGenerator for ScriptedTokenGenerator {
    fn generate(&self, width: TokenWidth) -> Result<TokenValue, TokenGeneratorError> {
        if let Some(next) = guard(&self.script).pop_front() {
            return next.map(|number| TokenValue::from_number(number, width));
        }
        let mut counter = guard(&self.counter);
        *counter += 1;
        Ok(TokenValue::from_number(*counter, width))
    }
}

/// Event sink keeping everything it receives.
#[derive(Debug, Default)]
pub struct RecordingEventSink(Mutex<Vec<DomainEvent>>);

impl RecordingEventSink {
    /// Events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        guard(&self.0).clone()
    }

    /// Names of the events published so far.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        guard(&self.0).iter().map(DomainEvent::name).collect()
    }
}

#[async_trait]
impl DomainEventSink for RecordingEventSink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), DomainEventSinkError> {
        guard(&self.0).push(event.clone());
        Ok(())
    }
}

/// Authenticator accepting a bare visitor UUID as the credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidVisitorAuthenticator;

impl VisitorAuthenticator for UuidVisitorAuthenticator {
    fn authenticate(&self, credential: &str) -> Result<VisitorId, VisitorAuthError> {
        if credential.is_empty() {
            return Err(VisitorAuthError::missing());
        }
        Uuid::parse_str(credential)
            .map(VisitorId::from_uuid)
            .map_err(|_| VisitorAuthError::malformed())
    }
}

/// In-memory chat store whose appends can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyChatHistoryStore {
    inner: InMemoryChatHistoryStore,
    failures: Mutex<usize>,
    read_failures: Mutex<usize>,
    last_sequence_override: Mutex<Option<SequenceNumber>>,
}

impl FlakyChatHistoryStore {
    /// Store that behaves normally until told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` appends with a connection error.
    pub fn fail_next_appends(&self, count: usize) {
        *guard(&self.failures) = count;
    }

    /// Fail the next `count` history reads with a connection error.
    pub fn fail_next_reads(&self, count: usize) {
        *guard(&self.read_failures) = count;
    }

    fn take_read_failure(&self) -> Result<(), ChatHistoryStoreError> {
        let mut failures = guard(&self.read_failures);
        if *failures == 0 {
            return Ok(());
        }
        *failures -= 1;
        Err(ChatHistoryStoreError::connection("chat store offline"))
    }

    /// Report `sequence` as the last stored sequence on the next lookup.
    pub fn misreport_last_sequence_once(&self, sequence: SequenceNumber) {
        *guard(&self.last_sequence_override) = Some(sequence);
    }
}

#[async_trait]
impl ChatHistoryStore for FlakyChatHistoryStore {
    async fn append(&self, message: &ChatMessage) -> Result<(), ChatHistoryStoreError> {
        {
            let mut failures = guard(&self.failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(ChatHistoryStoreError::connection("chat store offline"));
            }
        }
        self.inner.append(message).await
    }

    async fn last_sequence(
        &self,
        venue_id: &VenueId,
    ) -> Result<SequenceNumber, ChatHistoryStoreError> {
        self.take_read_failure()?;
        if let Some(sequence) = guard(&self.last_sequence_override).take() {
            return Ok(sequence);
        }
        self.inner.last_sequence(venue_id).await
    }

    async fn read_after(
        &self,
        venue_id: &VenueId,
        after: SequenceNumber,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatHistoryStoreError> {
        self.take_read_failure()?;
        self.inner.read_after(venue_id, after, limit).await
    }
}
