//! Chat socket tests over a real listener.

use super::*;
use crate::domain::{RotationFrequency, VenueId, VisitorId, VisitorSessionId};
use crate::inbound::http::test_utils::harness_state;
use crate::inbound::ws::state::AllowedOrigins;
use crate::inbound::ws::ws_entry;
use crate::test_support::at;
use crate::test_support::harness::GatewayHarness;
use actix_web::{App, HttpServer, dev::ServerHandle, http::header, web};
use awc::{BoxedSocket, ws::Codec, ws::Frame};
use futures_util::{SinkExt, StreamExt};
use rstest::{fixture, rstest};
use serde_json::{Value, json};

type Socket = actix_codec::Framed<BoxedSocket, Codec>;

struct ChatServer {
    url: String,
    harness: GatewayHarness,
    venue: VenueId,
    handle: ServerHandle,
}

impl ChatServer {
    async fn admit(&self) -> (VisitorId, VisitorSessionId) {
        let visitor = VisitorId::random();
        let epoch = self
            .harness
            .manager
            .current_epoch(self.venue)
            .await
            .expect("epoch");
        let scan = self
            .harness
            .resolver
            .scan(self.venue, epoch.token_value.as_str(), visitor)
            .await
            .expect("admitted");
        (visitor, scan.session.id)
    }

    async fn join(&self) -> (Socket, VisitorSessionId, Value) {
        let (visitor, session) = self.admit().await;
        let (_resp, mut socket) = awc::Client::default()
            .ws(format!("{}/ws/venues/{}?session={session}", self.url, self.venue))
            .set_header(header::ORIGIN, "http://localhost:3000")
            .set_header(header::AUTHORIZATION, format!("Bearer {visitor}"))
            .connect()
            .await
            .expect("websocket connect");
        let welcome = next_json(&mut socket).await;
        (socket, session, welcome)
    }
}

#[fixture]
async fn chat_server() -> ChatServer {
    let harness = GatewayHarness::new(at(21, 0));
    let venue = harness.add_venue(RotationFrequency::Daily);
    let state = harness_state(&harness);
    let origins = web::Data::new(AllowedOrigins::new(["http://localhost:3000"]));
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(origins.clone())
            .service(ws_entry)
    })
    .workers(1)
    .listen(listener)
    .expect("bind test server")
    .disable_signals()
    .run();
    let handle = server.handle();
    actix_web::rt::spawn(server);
    ChatServer {
        url: format!("http://{addr}"),
        harness,
        venue,
        handle,
    }
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = socket.next().await.expect("response frame").expect("frame");
        match frame {
            Frame::Text(bytes) => return serde_json::from_slice(&bytes).expect("json frame"),
            Frame::Ping(_) | Frame::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

async fn next_close(socket: &mut Socket) -> CloseReason {
    let observed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(frame) = socket.next().await {
            match frame.expect("frame") {
                Frame::Close(reason) => return reason,
                Frame::Ping(_) | Frame::Pong(_) | Frame::Text(_) => continue,
                other => panic!("unexpected frame before close: {other:?}"),
            }
        }
        None
    })
    .await
    .expect("close frame within timeout");
    observed.expect("close reason")
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket
        .send(awc::ws::Message::Text(value.to_string().into()))
        .await
        .expect("send text");
}

#[rstest]
#[actix_rt::test]
async fn welcome_reports_the_watermark(#[future] chat_server: ChatServer) {
    let server = chat_server.await;

    let (_socket, session, welcome) = server.join().await;

    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["watermark"], 0);
    assert_eq!(welcome["sessionId"], session.to_string());
    assert_eq!(welcome["venueId"], server.venue.to_string());
    server.handle.stop(false).await;
}

#[rstest]
#[actix_rt::test]
async fn members_observe_one_ordered_stream(#[future] chat_server: ChatServer) {
    let server = chat_server.await;
    let (mut alice, alice_session, _) = server.join().await;
    let (mut bob, _, _) = server.join().await;

    send_json(&mut alice, json!({"type": "send", "text": "Hi"})).await;
    let ack = next_json(&mut alice).await;
    let seen_by_bob = next_json(&mut bob).await;

    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["message"]["sequenceNumber"], 1);
    assert_eq!(seen_by_bob["type"], "message");
    assert_eq!(seen_by_bob["message"]["text"], "Hi");
    assert_eq!(
        seen_by_bob["message"]["senderSessionId"],
        alice_session.to_string()
    );

    let (mut carol, _, welcome) = server.join().await;
    assert_eq!(welcome["watermark"], 1);

    send_json(&mut bob, json!({"type": "send", "text": "welcome"})).await;
    let seen_by_carol = next_json(&mut carol).await;
    assert_eq!(seen_by_carol["message"]["sequenceNumber"], 2);
    assert_eq!(next_json(&mut alice).await["message"]["sequenceNumber"], 2);
    server.handle.stop(false).await;
}

#[rstest]
#[actix_rt::test]
async fn invalid_text_reports_an_error_and_stays_open(#[future] chat_server: ChatServer) {
    let server = chat_server.await;
    let (mut socket, _, _) = server.join().await;

    send_json(&mut socket, json!({"type": "send", "text": "   "})).await;
    let error = next_json(&mut socket).await;
    send_json(&mut socket, json!({"type": "send", "text": "still here"})).await;
    let ack = next_json(&mut socket).await;

    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "invalid_request");
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["message"]["sequenceNumber"], 1);
    server.handle.stop(false).await;
}

#[rstest]
#[actix_rt::test]
async fn ping_frames_refresh_the_visitor_session(#[future] chat_server: ChatServer) {
    let server = chat_server.await;
    let (mut socket, session, _) = server.join().await;
    server.harness.clock.set(at(21, 7));

    send_json(&mut socket, json!({"type": "ping"})).await;

    let refreshed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let seen = server
                .harness
                .presence
                .find_open(session)
                .await
                .map(|open| open.last_seen_at);
            if seen == Some(at(21, 7)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(refreshed.is_ok(), "heartbeat not recorded");
    server.handle.stop(false).await;
}

#[rstest]
#[actix_rt::test]
async fn leaving_the_venue_ends_the_chat(#[future] chat_server: ChatServer) {
    let server = chat_server.await;
    let (mut socket, session, _) = server.join().await;
    let (mut other, _, _) = server.join().await;

    server.harness.presence.leave(session).await.expect("left");
    let reason = next_close(&mut socket).await;
    send_json(&mut other, json!({"type": "send", "text": "after you left"})).await;
    let ack = next_json(&mut other).await;

    assert_eq!(ack["type"], "ack");
    assert_eq!(reason.code, CloseCode::Policy);
    assert_eq!(reason.description.as_deref(), Some("session closed"));
    server.handle.stop(false).await;
}

#[rstest]
#[actix_rt::test]
async fn closes_on_malformed_json(#[future] chat_server: ChatServer) {
    let server = chat_server.await;
    let (mut socket, _, _) = server.join().await;

    socket
        .send(awc::ws::Message::Text("not-json".into()))
        .await
        .expect("send text");

    let reason = next_close(&mut socket).await;
    assert_eq!(reason.code, CloseCode::Policy);
    server.handle.stop(false).await;
}

#[rstest]
#[actix_rt::test]
async fn closes_after_timeout_without_client_messages(#[future] chat_server: ChatServer) {
    let server = chat_server.await;
    let (mut socket, session, _) = server.join().await;
    tokio::time::sleep(CLIENT_TIMEOUT + HEARTBEAT_INTERVAL * 3).await;

    let reason = next_close(&mut socket).await;

    assert_eq!(reason.code, CloseCode::Normal);
    assert_eq!(reason.description.as_deref(), Some("heartbeat timeout"));
    assert!(
        server.harness.presence.find_open(session).await.is_some(),
        "dropping the socket keeps the visitor session open"
    );
    server.handle.stop(false).await;
}
