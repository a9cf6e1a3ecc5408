//! Builders wiring the domain services over their storage adapters.
//!
//! With `database_url` set every store is PostgreSQL-backed and migrations run
//! first; without it the gateway runs on in-memory stores, which suits a
//! single node that can afford to lose chat and presence on restart.

use std::sync::Arc;

use color_eyre::eyre::{Context, Result};
use mockable::Clock;
use tracing::info;

use venue_gateway::domain::ports::{
    ChatHistoryStore, DomainEventSink, GatewayMetrics, TokenEpochRepository, VenueDirectory,
    VisitorAuthenticator, VisitorSessionRepository,
};
use venue_gateway::domain::{
    AccessResolver, ChatGateway, ChatGatewayPorts, PresenceSweeper, PresenceTracker,
    RotationScheduler, TokenEpochManager, TokenEpochManagerPorts, Venue,
    rotation_schedule_channel,
};
use venue_gateway::inbound::http::state::HttpState;
use venue_gateway::outbound::memory::{
    InMemoryChatHistoryStore, InMemoryTokenEpochRepository, InMemoryVenueDirectory,
    InMemoryVisitorSessionRepository,
};
use venue_gateway::outbound::persistence::{
    DbPool, DieselChatHistoryStore, DieselTokenEpochRepository, DieselVenueDirectory,
    DieselVisitorSessionRepository, PoolConfig, run_pending_migrations,
};
use venue_gateway::outbound::tokens::OsRngTokenGenerator;
use venue_gateway::settings::GatewaySettings;

/// Storage ports shared by the services.
pub(crate) struct Stores {
    pub(crate) venues: Arc<dyn VenueDirectory>,
    pub(crate) epochs: Arc<dyn TokenEpochRepository>,
    pub(crate) sessions: Arc<dyn VisitorSessionRepository>,
    pub(crate) history: Arc<dyn ChatHistoryStore>,
}

/// Non-storage collaborators.
pub(crate) struct Edges {
    pub(crate) authenticator: Arc<dyn VisitorAuthenticator>,
    pub(crate) events: Arc<dyn DomainEventSink>,
    pub(crate) metrics: Arc<dyn GatewayMetrics>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Wired services plus the background workers `main` spawns.
pub(crate) struct Gateway {
    pub(crate) http_state: HttpState,
    pub(crate) scheduler: RotationScheduler,
    pub(crate) sweeper: PresenceSweeper,
}

/// Venues listed in the seed file, if one is configured.
pub(crate) fn load_seed(settings: &GatewaySettings) -> Result<Vec<Venue>> {
    let Some(path) = settings.venues_file() else {
        return Ok(Vec::new());
    };
    let seed = InMemoryVenueDirectory::from_json_file(path)
        .wrap_err_with(|| format!("loading venues from {}", path.display()))?;
    Ok(seed.venues())
}

impl Stores {
    pub(crate) fn in_memory(seed: Vec<Venue>) -> Self {
        info!(venues = seed.len(), "using in-memory stores");
        Self {
            venues: Arc::new(InMemoryVenueDirectory::new(seed)),
            epochs: Arc::new(InMemoryTokenEpochRepository::new()),
            sessions: Arc::new(InMemoryVisitorSessionRepository::new()),
            history: Arc::new(InMemoryChatHistoryStore::new()),
        }
    }

    pub(crate) async fn postgres(
        database_url: &str,
        max_connections: u32,
        seed: Vec<Venue>,
    ) -> Result<Self> {
        let applied = run_pending_migrations(database_url)
            .await
            .wrap_err("running database migrations")?;
        info!(applied, "database migrations complete");

        let pool = DbPool::new(PoolConfig::new(database_url).with_max_size(max_connections))
            .await
            .wrap_err("building database pool")?;
        let venues = DieselVenueDirectory::new(pool.clone());
        let seeded = venues
            .upsert_all(&seed)
            .await
            .wrap_err("seeding venues")?;
        info!(seeded, "using PostgreSQL stores");

        Ok(Self {
            venues: Arc::new(venues),
            epochs: Arc::new(DieselTokenEpochRepository::new(pool.clone())),
            sessions: Arc::new(DieselVisitorSessionRepository::new(pool.clone())),
            history: Arc::new(DieselChatHistoryStore::new(pool)),
        })
    }
}

/// Build every service from `settings`.
pub(crate) fn build_gateway(
    settings: &GatewaySettings,
    stores: Stores,
    edges: Edges,
) -> Result<Gateway> {
    let Stores {
        venues,
        epochs,
        sessions,
        history,
    } = stores;
    let Edges {
        authenticator,
        events,
        metrics,
        clock,
    } = edges;

    let (schedule, inbox) = rotation_schedule_channel();
    let manager = Arc::new(TokenEpochManager::new(
        TokenEpochManagerPorts {
            venues: Arc::clone(&venues),
            epochs,
            generator: Arc::new(OsRngTokenGenerator),
            events: Arc::clone(&events),
            metrics: Arc::clone(&metrics),
        },
        Arc::clone(&clock),
        settings.epoch_manager()?,
        schedule,
    ));
    let scheduler = RotationScheduler::new(
        Arc::clone(&manager),
        Arc::clone(&clock),
        inbox,
        settings.scheduler(),
    );
    let presence = Arc::new(PresenceTracker::new(
        sessions,
        Arc::clone(&events),
        Arc::clone(&clock),
        settings.presence()?,
    ));
    let sweeper = PresenceSweeper::new(
        Arc::clone(&presence),
        Arc::clone(&manager),
        settings.sweep_interval(),
    );
    let resolver = Arc::new(AccessResolver::new(
        Arc::clone(&venues),
        Arc::clone(&manager),
        Arc::clone(&presence),
        Arc::clone(&metrics),
        Arc::clone(&clock),
        settings.access()?,
    ));
    let gateway = Arc::new(ChatGateway::new(
        Arc::clone(&presence),
        Arc::clone(&manager),
        ChatGatewayPorts {
            history,
            authenticator,
            venues,
            events,
            metrics,
        },
        Arc::clone(&clock),
        settings.chat(),
    ));

    Ok(Gateway {
        http_state: HttpState {
            epochs: manager,
            resolver,
            presence,
            gateway,
            clock,
            qr_base: settings.qr_base_url()?,
        },
        scheduler,
        sweeper,
    })
}
