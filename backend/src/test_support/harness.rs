//! Fully wired domain over in-memory adapters and a hand-driven clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::ports::NoOpGatewayMetrics;
use crate::domain::{
    AccessResolver, AccessResolverConfig, ChatGateway, ChatGatewayConfig, ChatGatewayPorts,
    PresenceConfig, PresenceTracker, RetryRuntime, RotationFrequency, RotationScheduler,
    RotationSchedulerConfig, TokenEpochManager, TokenEpochManagerConfig, TokenEpochManagerPorts,
    Venue, VenueId, rotation_schedule_channel,
};
use crate::outbound::memory::{
    InMemoryTokenEpochRepository, InMemoryVenueDirectory, InMemoryVisitorSessionRepository,
};

use super::{
    FlakyChatHistoryStore, ImmediateSleeper, MutableClock, NoJitter, RecordingEventSink,
    ScriptedTokenGenerator, UuidVisitorAuthenticator,
};

/// Knobs for [`GatewayHarness::with_config`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HarnessConfig {
    /// Epoch manager settings.
    pub epochs: TokenEpochManagerConfig,
    /// Presence settings.
    pub presence: PresenceConfig,
    /// Resolver settings.
    pub access: AccessResolverConfig,
    /// Chat settings.
    pub chat: ChatGatewayConfig,
}

/// Every domain service wired to in-memory doubles.
pub struct GatewayHarness {
    /// Shared clock.
    pub clock: Arc<MutableClock>,
    /// Venue configuration.
    pub venues: Arc<InMemoryVenueDirectory>,
    /// Epoch history.
    pub epoch_store: Arc<InMemoryTokenEpochRepository>,
    /// Session store.
    pub session_store: Arc<InMemoryVisitorSessionRepository>,
    /// Chat store with failure injection.
    pub chat_store: Arc<FlakyChatHistoryStore>,
    /// Deterministic token source.
    pub tokens: Arc<ScriptedTokenGenerator>,
    /// Captured domain events.
    pub events: Arc<RecordingEventSink>,
    /// Epoch manager.
    pub manager: Arc<TokenEpochManager>,
    /// Rotation scheduler fed by the manager.
    pub scheduler: RotationScheduler,
    /// Presence tracker.
    pub presence: Arc<PresenceTracker>,
    /// Access resolver.
    pub resolver: Arc<AccessResolver>,
    /// Chat gateway; credentials are bare visitor UUIDs.
    pub gateway: Arc<ChatGateway>,
}

impl GatewayHarness {
    /// Harness with default settings starting at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_config(start, HarnessConfig::default())
    }

    /// Harness with explicit settings.
    #[must_use]
    pub fn with_config(start: DateTime<Utc>, config: HarnessConfig) -> Self {
        let clock = Arc::new(MutableClock::new(start));
        let venues = Arc::new(InMemoryVenueDirectory::default());
        let epoch_store = Arc::new(InMemoryTokenEpochRepository::new());
        let session_store = Arc::new(InMemoryVisitorSessionRepository::new());
        let chat_store = Arc::new(FlakyChatHistoryStore::new());
        let tokens = Arc::new(ScriptedTokenGenerator::default());
        let events = Arc::new(RecordingEventSink::default());
        let metrics = Arc::new(NoOpGatewayMetrics);

        let (schedule, inbox) = rotation_schedule_channel();
        let manager = Arc::new(TokenEpochManager::with_runtime(
            TokenEpochManagerPorts {
                venues: venues.clone(),
                epochs: epoch_store.clone(),
                generator: tokens.clone(),
                events: events.clone(),
                metrics: metrics.clone(),
            },
            clock.clone(),
            RetryRuntime {
                sleeper: Arc::new(ImmediateSleeper),
                jitter: Arc::new(NoJitter),
            },
            config.epochs,
            schedule,
        ));
        let scheduler = RotationScheduler::new(
            Arc::clone(&manager),
            clock.clone(),
            inbox,
            RotationSchedulerConfig::default(),
        );
        let presence = Arc::new(PresenceTracker::new(
            session_store.clone(),
            events.clone(),
            clock.clone(),
            config.presence,
        ));
        let resolver = Arc::new(AccessResolver::new(
            venues.clone(),
            Arc::clone(&manager),
            Arc::clone(&presence),
            metrics.clone(),
            clock.clone(),
            config.access,
        ));
        let gateway = Arc::new(ChatGateway::new(
            Arc::clone(&presence),
            Arc::clone(&manager),
            ChatGatewayPorts {
                history: chat_store.clone(),
                authenticator: Arc::new(UuidVisitorAuthenticator),
                venues: venues.clone(),
                events: events.clone(),
                metrics,
            },
            clock.clone(),
            config.chat,
        ));

        Self {
            clock,
            venues,
            epoch_store,
            session_store,
            chat_store,
            tokens,
            events,
            manager,
            scheduler,
            presence,
            resolver,
            gateway,
        }
    }

    /// Register an active venue.
    #[must_use]
    pub fn add_venue(&self, rotation_frequency: RotationFrequency) -> VenueId {
        let venue = Venue::active(VenueId::random(), rotation_frequency);
        self.venues.upsert(venue.clone());
        venue.id
    }
}
