//! Server construction and middleware wiring.

mod config;
mod state_builders;

pub use config::ServerConfig;
pub(crate) use state_builders::{Edges, Stores, build_gateway, load_seed};

use actix_session::{
    SessionMiddleware,
    config::{CookieContentSecurity, PersistentSession},
    storage::CookieSessionStore,
};
use actix_web::cookie::{Key, SameSite};
use actix_web::dev::{Server, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, HttpServer, web};
#[cfg(debug_assertions)]
use utoipa::OpenApi;
#[cfg(debug_assertions)]
use utoipa_swagger_ui::SwaggerUi;

use venue_gateway::Trace;
#[cfg(debug_assertions)]
use venue_gateway::doc::ApiDoc;
use venue_gateway::inbound::http::access::{scan, scan_payload};
use venue_gateway::inbound::http::epochs::{current_epoch, rotate_epoch};
use venue_gateway::inbound::http::error::{
    json_error_handler, path_error_handler, query_error_handler,
};
use venue_gateway::inbound::http::health::{HealthState, live, ready};
use venue_gateway::inbound::http::messages::list_messages;
use venue_gateway::inbound::http::presence::presence;
use venue_gateway::inbound::http::sessions::{heartbeat, leave};
use venue_gateway::inbound::http::state::HttpState;
use venue_gateway::inbound::ws;
use venue_gateway::inbound::ws::state::AllowedOrigins;

#[derive(Clone)]
struct AppDependencies {
    health_state: web::Data<HealthState>,
    http_state: web::Data<HttpState>,
    origins: web::Data<AllowedOrigins>,
    key: Key,
    cookie_secure: bool,
    same_site: SameSite,
}

fn build_app(
    deps: AppDependencies,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let AppDependencies {
        health_state,
        http_state,
        origins,
        key,
        cookie_secure,
        same_site,
    } = deps;

    let session = SessionMiddleware::builder(CookieSessionStore::default(), key)
        .cookie_name("session".into())
        .cookie_path("/".into())
        .cookie_secure(cookie_secure)
        .cookie_http_only(true)
        .cookie_content_security(CookieContentSecurity::Private)
        .cookie_same_site(same_site)
        .session_lifecycle(
            PersistentSession::default().session_ttl(actix_web::cookie::time::Duration::hours(12)),
        )
        .build();

    let api = web::scope("/api/v1")
        .service(current_epoch)
        .service(rotate_epoch)
        .service(scan)
        .service(scan_payload)
        .service(heartbeat)
        .service(leave)
        .service(presence)
        .service(list_messages);

    let app = App::new()
        .app_data(health_state)
        .app_data(http_state)
        .app_data(origins)
        .app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .app_data(web::QueryConfig::default().error_handler(query_error_handler))
        .app_data(web::PathConfig::default().error_handler(path_error_handler))
        .wrap(session)
        .wrap(Trace)
        .service(api)
        .service(ws::ws_entry)
        .service(ready)
        .service(live);

    #[cfg(debug_assertions)]
    let app = app.service(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    app
}

/// Construct an Actix HTTP server over the wired gateway.
///
/// Readiness stays unset; `main` marks it once the background workers run.
///
/// # Errors
/// Propagates [`std::io::Error`] when binding the socket fails.
pub fn create_server(
    health_state: web::Data<HealthState>,
    http_state: HttpState,
    config: ServerConfig,
) -> std::io::Result<Server> {
    let http_state = web::Data::new(http_state);
    let ServerConfig {
        key,
        cookie_secure,
        same_site,
        bind_addr,
        origins,
        #[cfg(feature = "metrics")]
        prometheus,
    } = config;
    let origins = web::Data::new(origins);

    #[cfg(feature = "metrics")]
    let prometheus = prometheus.ok_or_else(|| {
        std::io::Error::other("metrics feature enabled but no Prometheus middleware configured")
    })?;

    let server = HttpServer::new(move || {
        let app = build_app(AppDependencies {
            health_state: health_state.clone(),
            http_state: http_state.clone(),
            origins: origins.clone(),
            key: key.clone(),
            cookie_secure,
            same_site,
        });

        #[cfg(feature = "metrics")]
        let app = app.wrap(prometheus.clone());

        app
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;
    use rstest::rstest;
    use serde_json::Value;

    use venue_gateway::domain::{RotationFrequency, VisitorId};
    use venue_gateway::test_support::at;
    use venue_gateway::test_support::harness::GatewayHarness;

    fn deps(harness: &GatewayHarness) -> AppDependencies {
        AppDependencies {
            health_state: web::Data::new(HealthState::new()),
            http_state: web::Data::new(HttpState {
                epochs: harness.manager.clone(),
                resolver: harness.resolver.clone(),
                presence: harness.presence.clone(),
                gateway: harness.gateway.clone(),
                clock: harness.clock.clone(),
                qr_base: None,
            }),
            origins: web::Data::new(AllowedOrigins::new(["http://localhost:3000"])),
            key: Key::generate(),
            cookie_secure: false,
            same_site: SameSite::Lax,
        }
    }

    #[rstest]
    #[actix_web::test]
    async fn routes_every_endpoint_under_one_app() {
        let harness = GatewayHarness::new(at(9, 0));
        let venue = harness.add_venue(RotationFrequency::Hourly);
        let app = actix_test::init_service(build_app(deps(&harness))).await;

        let epoch: Value = actix_test::call_and_read_body_json(
            &app,
            actix_test::TestRequest::get()
                .uri(&format!("/api/v1/venues/{venue}/epoch"))
                .to_request(),
        )
        .await;
        let token = epoch["token"].as_str().expect("token").to_owned();

        let scan_response = actix_test::call_service(
            &app,
            actix_test::TestRequest::post()
                .uri(&format!("/api/v1/venues/{venue}/scan"))
                .insert_header(("Authorization", format!("Bearer {}", VisitorId::random())))
                .set_json(serde_json::json!({ "token": token }))
                .to_request(),
        )
        .await;
        assert_eq!(scan_response.status(), StatusCode::OK);
        assert!(scan_response.headers().contains_key("trace-id"));

        let counters: Value = actix_test::call_and_read_body_json(
            &app,
            actix_test::TestRequest::get()
                .uri(&format!("/api/v1/venues/{venue}/presence"))
                .to_request(),
        )
        .await;
        assert_eq!(counters["activeVisitors"], 1);
    }

    #[rstest]
    #[actix_web::test]
    async fn malformed_json_uses_the_error_envelope() {
        let harness = GatewayHarness::new(at(9, 0));
        let venue = harness.add_venue(RotationFrequency::Hourly);
        let app = actix_test::init_service(build_app(deps(&harness))).await;

        let response = actix_test::call_service(
            &app,
            actix_test::TestRequest::post()
                .uri(&format!("/api/v1/venues/{venue}/scan"))
                .insert_header(("Authorization", format!("Bearer {}", VisitorId::random())))
                .insert_header(("Content-Type", "application/json"))
                .set_payload("{not json")
                .to_request(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = actix_test::read_body_json(response).await;
        assert_eq!(body["details"]["source"], "body");
    }

    #[rstest]
    #[actix_web::test]
    async fn probes_answer_outside_the_api_scope() {
        let harness = GatewayHarness::new(at(9, 0));
        let app = actix_test::init_service(build_app(deps(&harness))).await;

        let live_response = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/health/live").to_request(),
        )
        .await;
        let ready_response = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/health/ready").to_request(),
        )
        .await;

        assert_eq!(live_response.status(), StatusCode::OK);
        assert_eq!(ready_response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
