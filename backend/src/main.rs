//! Gateway entry point: loads settings, wires the adapters and serves REST and
//! WebSocket traffic alongside the rotation and presence workers.

mod server;

use std::sync::Arc;

use actix_web::web;
#[cfg(feature = "metrics")]
use actix_web_prom::PrometheusMetricsBuilder;
use color_eyre::eyre::{Context, Result, eyre};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use venue_gateway::domain::ports::GatewayMetrics;
use venue_gateway::inbound::http::health::HealthState;
use venue_gateway::inbound::http::session_config::{BuildMode, session_settings};
use venue_gateway::inbound::ws::state::AllowedOrigins;
use venue_gateway::outbound::credentials::SignedVisitorAuthenticator;
use venue_gateway::outbound::events::TracingDomainEventSink;
use venue_gateway::settings::GatewaySettings;

use server::{Edges, ServerConfig, Stores, build_gateway, create_server, load_seed};

/// Application bootstrap.
#[actix_web::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = GatewaySettings::load().map_err(|err| eyre!("loading settings: {err}"))?;
    let session = session_settings(&settings, BuildMode::from_debug_assertions())
        .wrap_err("validating session settings")?;
    let authenticator = SignedVisitorAuthenticator::from_secret_file(
        settings.credential_secret_file(),
    )
    .wrap_err("loading visitor credential secret")?;

    let seed = load_seed(&settings)?;
    let stores = match settings.database_url() {
        Some(url) => Stores::postgres(url, settings.db_max_connections(), seed).await?,
        None => Stores::in_memory(seed),
    };

    let config = ServerConfig::new(
        session,
        settings.bind_addr()?,
        AllowedOrigins::new(settings.allowed_origins()),
    );
    #[cfg(feature = "metrics")]
    let (config, metrics): (ServerConfig, Arc<dyn GatewayMetrics>) = {
        let prometheus = PrometheusMetricsBuilder::new("venue_gateway")
            .endpoint("/metrics")
            .build()
            .map_err(|err| eyre!("configuring Prometheus metrics: {err}"))?;
        let gateway_metrics =
            venue_gateway::outbound::metrics::PrometheusGatewayMetrics::new(&prometheus.registry)
                .wrap_err("registering gateway metrics")?;
        (config.with_metrics(prometheus), Arc::new(gateway_metrics))
    };
    #[cfg(not(feature = "metrics"))]
    let metrics: Arc<dyn GatewayMetrics> =
        Arc::new(venue_gateway::domain::ports::NoOpGatewayMetrics);

    let gateway = build_gateway(
        &settings,
        stores,
        Edges {
            authenticator: Arc::new(authenticator),
            events: Arc::new(TracingDomainEventSink),
            metrics,
            clock: Arc::new(DefaultClock),
        },
    )?;

    let restored = gateway
        .http_state
        .presence
        .hydrate()
        .await
        .wrap_err("restoring open visitor sessions")?;
    info!(restored, "presence restored");

    let bind_addr = config.bind_addr();
    let health_state = web::Data::new(HealthState::new());
    let server = create_server(health_state.clone(), gateway.http_state, config)
        .wrap_err_with(|| format!("binding {bind_addr}"))?;

    let scheduler = actix_web::rt::spawn(gateway.scheduler.run());
    let sweeper = actix_web::rt::spawn(gateway.sweeper.run());
    health_state.mark_ready();
    info!(%bind_addr, "venue gateway listening");

    let outcome = server.await;
    scheduler.abort();
    sweeper.abort();
    outcome.wrap_err("server terminated")
}
