//! Session helpers to keep HTTP handlers free of framework-specific logic.
//!
//! The cookie session remembers which visitor session a browser opened with
//! its last scan, so follow-up calls can omit the id.

use actix_session::Session;
use actix_web::{FromRequest, HttpRequest, dev::Payload};
use futures_util::future::LocalBoxFuture;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Error, VenueId, VisitorSessionId};

pub(crate) const VISITOR_SESSION_KEY: &str = "visitor_session";
pub(crate) const VENUE_KEY: &str = "venue";

/// Newtype wrapper exposing visitor-session bookkeeping on the cookie.
#[derive(Clone)]
pub struct SessionContext(Session);

impl SessionContext {
    /// Wrap the underlying Actix session.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self(session)
    }

    /// Remember the visitor session opened at `venue_id`.
    ///
    /// # Errors
    /// Returns an internal error when the cookie cannot be written.
    pub fn remember_visit(
        &self,
        venue_id: VenueId,
        session_id: VisitorSessionId,
    ) -> Result<(), Error> {
        self.0
            .insert(VENUE_KEY, venue_id.to_string())
            .and_then(|()| self.0.insert(VISITOR_SESSION_KEY, session_id.to_string()))
            .map_err(|error| Error::internal(format!("failed to persist session: {error}")))
    }

    /// The visitor session recorded by the last scan, if any.
    ///
    /// # Errors
    /// Returns an internal error when the cookie cannot be read.
    pub fn visitor_session(&self) -> Result<Option<(VenueId, VisitorSessionId)>, Error> {
        let read = |key: &str| {
            self.0
                .get::<String>(key)
                .map_err(|error| Error::internal(format!("failed to read session: {error}")))
        };
        let (Some(venue), Some(session)) = (read(VENUE_KEY)?, read(VISITOR_SESSION_KEY)?) else {
            return Ok(None);
        };
        match (Uuid::parse_str(&venue), Uuid::parse_str(&session)) {
            (Ok(venue), Ok(session)) => Ok(Some((
                VenueId::from_uuid(venue),
                VisitorSessionId::from_uuid(session),
            ))),
            _ => {
                warn!("invalid visitor session in cookie; ignoring");
                Ok(None)
            }
        }
    }

    /// Drop the remembered visitor session.
    pub fn forget_visit(&self) {
        self.0.remove(VENUE_KEY);
        self.0.remove(VISITOR_SESSION_KEY);
    }
}

impl FromRequest for SessionContext {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let fut = Session::from_request(req, payload);
        Box::pin(async move { fut.await.map(SessionContext::new) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpResponse, test, web};

    use crate::inbound::http::test_utils::{session_cookie, test_session_middleware};

    const VENUE: &str = "5b0c9f2e-2f7c-4d1e-a3f1-6a2d7c9e4b10";
    const SESSION: &str = "0d6f3e2a-8c41-4b5e-9f7a-2c1d3e4f5a60";

    fn parsed(raw: &str) -> Uuid {
        Uuid::parse_str(raw).expect("fixture uuid")
    }

    #[actix_web::test]
    async fn remembers_and_forgets_the_visit() {
        let app = test::init_service(
            App::new()
                .wrap(test_session_middleware())
                .route(
                    "/set",
                    web::get().to(|session: SessionContext| async move {
                        session.remember_visit(
                            VenueId::from_uuid(parsed(VENUE)),
                            VisitorSessionId::from_uuid(parsed(SESSION)),
                        )?;
                        Ok::<_, Error>(HttpResponse::Ok())
                    }),
                )
                .route(
                    "/get",
                    web::get().to(|session: SessionContext| async move {
                        let body = match session.visitor_session()? {
                            Some((venue, id)) => format!("{venue}/{id}"),
                            None => "none".to_owned(),
                        };
                        Ok::<_, Error>(HttpResponse::Ok().body(body))
                    }),
                ),
        )
        .await;

        let set = test::call_service(&app, test::TestRequest::get().uri("/set").to_request()).await;
        assert_eq!(set.status(), StatusCode::OK);
        let cookie = session_cookie(&set);

        let get = test::call_service(
            &app,
            test::TestRequest::get().uri("/get").cookie(cookie).to_request(),
        )
        .await;
        let body = test::read_body(get).await;
        assert_eq!(body, format!("{VENUE}/{SESSION}"));
    }

    #[actix_web::test]
    async fn tampered_ids_are_ignored() {
        let app = test::init_service(
            App::new()
                .wrap(test_session_middleware())
                .route(
                    "/set",
                    web::get().to(|session: Session| async move {
                        session.insert(VENUE_KEY, "lobby").expect("insert");
                        session.insert(VISITOR_SESSION_KEY, SESSION).expect("insert");
                        HttpResponse::Ok()
                    }),
                )
                .route(
                    "/get",
                    web::get().to(|session: SessionContext| async move {
                        let found = session.visitor_session()?.is_some();
                        Ok::<_, Error>(HttpResponse::Ok().body(found.to_string()))
                    }),
                ),
        )
        .await;

        let set = test::call_service(&app, test::TestRequest::get().uri("/set").to_request()).await;
        let get = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/get")
                .cookie(session_cookie(&set))
                .to_request(),
        )
        .await;
        assert_eq!(test::read_body(get).await, "false");
    }
}
