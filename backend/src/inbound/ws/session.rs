//! Per-connection chat socket.
//!
//! Keeps WebSocket framing and heartbeats at the edge. The loop multiplexes
//! three sources: the heartbeat timer, client frames and deliveries queued by
//! the venue's chat actor. The public contract pings every 5s and considers a
//! connection idle after 10s without client traffic; tests shorten both.
//! Leaving the socket never closes the visitor session; closing the visitor
//! session ends the socket with a policy close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_ws::{CloseCode, CloseReason, Closed, Message, MessageStream, ProtocolError, Session};
use tokio::time;
use tracing::{debug, warn};

use crate::domain::{ChatConnection, ChatDelivery, Error, PresenceTracker, SendError};
use crate::inbound::ws::messages::{ClientFrame, ServerFrame};

/// Time between heartbeats to the client (5s in production, shorter in tests).
#[cfg(not(test))]
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
#[cfg(test)]
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

/// Max idle time before disconnecting the client (10s in production, shorter in tests).
#[cfg(not(test))]
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(test)]
const CLIENT_TIMEOUT: Duration = Duration::from_millis(300);

pub(super) async fn run_chat_socket(
    connection: ChatConnection,
    presence: Arc<PresenceTracker>,
    socket: Session,
    stream: MessageStream,
) {
    ChatSocket {
        connection,
        presence,
    }
    .run(socket, stream)
    .await;
}

enum Event {
    Tick,
    Client(Option<Result<Message, ProtocolError>>),
    Delivery(Option<ChatDelivery>),
}

enum SocketError {
    ClientClosed(Option<CloseReason>),
    StreamClosed,
    HeartbeatTimeout,
    Protocol(ProtocolError),
    InvalidPayload,
    SessionEnded,
    ChatReset,
    Network(Closed),
}

struct ChatSocket {
    connection: ChatConnection,
    presence: Arc<PresenceTracker>,
}

impl ChatSocket {
    async fn run(mut self, mut socket: Session, mut stream: MessageStream) {
        let welcome = ServerFrame::welcome(&self.connection);
        if let Err(error) = send_frame(&mut socket, &welcome).await {
            self.shut_down(socket, SocketError::Network(error)).await;
            return;
        }

        let mut last_heartbeat = Instant::now();
        let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);

        loop {
            let event = tokio::select! {
                _ = heartbeat.tick() => Event::Tick,
                message = stream.recv() => Event::Client(message),
                delivery = self.connection.recv() => Event::Delivery(delivery),
            };

            let result = match event {
                Event::Tick => Self::handle_heartbeat_tick(&mut socket, last_heartbeat).await,
                Event::Client(None) => Err(SocketError::StreamClosed),
                Event::Client(Some(Err(error))) => Err(SocketError::Protocol(error)),
                Event::Client(Some(Ok(message))) => {
                    self.handle_message(&mut socket, &mut last_heartbeat, message)
                        .await
                }
                Event::Delivery(delivery) => self.forward(&mut socket, delivery).await,
            };

            if let Err(error) = result {
                self.shut_down(socket, error).await;
                return;
            }
        }
    }

    async fn handle_heartbeat_tick(
        socket: &mut Session,
        last_heartbeat: Instant,
    ) -> Result<(), SocketError> {
        if Instant::now().duration_since(last_heartbeat) > CLIENT_TIMEOUT {
            return Err(SocketError::HeartbeatTimeout);
        }
        socket.ping(b"").await.map_err(SocketError::Network)
    }

    async fn handle_message(
        &self,
        socket: &mut Session,
        last_heartbeat: &mut Instant,
        message: Message,
    ) -> Result<(), SocketError> {
        match message {
            Message::Ping(payload) => {
                *last_heartbeat = Instant::now();
                socket.pong(&payload).await.map_err(SocketError::Network)
            }
            Message::Text(text) => {
                *last_heartbeat = Instant::now();
                self.handle_text(socket, text.as_ref()).await
            }
            Message::Pong(_) | Message::Binary(_) | Message::Continuation(_) | Message::Nop => {
                *last_heartbeat = Instant::now();
                Ok(())
            }
            Message::Close(reason) => Err(SocketError::ClientClosed(reason)),
        }
    }

    async fn handle_text(&self, socket: &mut Session, text: &str) -> Result<(), SocketError> {
        let frame = serde_json::from_str::<ClientFrame>(text).map_err(|error| {
            warn!(error = %error, "Rejected malformed WebSocket payload");
            SocketError::InvalidPayload
        })?;
        match frame {
            ClientFrame::Send { text } => self.handle_send(socket, &text).await,
            ClientFrame::Ping => self.handle_ping(socket).await,
        }
    }

    /// The stored message reaches the client as an `ack` through the
    /// connection's queue, so a successful send writes nothing here.
    async fn handle_send(&self, socket: &mut Session, text: &str) -> Result<(), SocketError> {
        match self.connection.send(text).await {
            Ok(message) => {
                debug!(
                    connection_id = %self.connection.id(),
                    sequence = %message.sequence_number,
                    "chat message accepted"
                );
                Ok(())
            }
            Err(error @ (SendError::InvalidText(_) | SendError::Unavailable(_))) => {
                send_frame(socket, &ServerFrame::from(Error::from(error)))
                    .await
                    .map_err(SocketError::Network)
            }
            Err(error @ (SendError::SessionInvalid | SendError::VenueInactive)) => {
                self.report_and(socket, error, SocketError::SessionEnded).await
            }
            Err(error @ (SendError::SequenceGap | SendError::Disconnected)) => {
                self.report_and(socket, error, SocketError::ChatReset).await
            }
        }
    }

    async fn handle_ping(&self, socket: &mut Session) -> Result<(), SocketError> {
        match self.presence.heartbeat(self.connection.session_id()).await {
            Ok(_) => Ok(()),
            Err(error) => {
                send_frame(socket, &ServerFrame::from(Error::from(error)))
                    .await
                    .map_err(SocketError::Network)?;
                Err(SocketError::SessionEnded)
            }
        }
    }

    async fn report_and(
        &self,
        socket: &mut Session,
        error: SendError,
        then: SocketError,
    ) -> Result<(), SocketError> {
        send_frame(socket, &ServerFrame::from(Error::from(error)))
            .await
            .map_err(SocketError::Network)?;
        Err(then)
    }

    async fn forward(
        &self,
        socket: &mut Session,
        delivery: Option<ChatDelivery>,
    ) -> Result<(), SocketError> {
        let frame = match delivery {
            Some(ChatDelivery::Message(message)) => ServerFrame::Message {
                message: message.into(),
            },
            Some(ChatDelivery::Ack(message)) => ServerFrame::Ack {
                message: message.into(),
            },
            None if self.connection.session_open().await => {
                return Err(SocketError::ChatReset);
            }
            None => return Err(SocketError::SessionEnded),
        };
        send_frame(socket, &frame)
            .await
            .map_err(SocketError::Network)
    }

    async fn shut_down(self, socket: Session, error: SocketError) {
        self.log_shutdown_reason(&error);
        if let Some(reason) = close_reason_for(error) {
            if let Err(error) = socket.close(reason).await {
                warn!(error = %error, "Failed to close WebSocket session");
            }
        }
    }

    fn log_shutdown_reason(&self, error: &SocketError) {
        let connection_id = self.connection.id();
        match error {
            SocketError::HeartbeatTimeout => {
                warn!(%connection_id, "WebSocket heartbeat timeout; closing connection");
            }
            SocketError::Protocol(error) => {
                warn!(%connection_id, error = %error, "WebSocket protocol error");
            }
            SocketError::Network(error) => {
                warn!(%connection_id, error = %error, "WebSocket send failed; closing connection");
            }
            SocketError::ChatReset => {
                warn!(%connection_id, "chat connection dropped by the gateway");
            }
            SocketError::SessionEnded => {
                debug!(%connection_id, "visitor session ended; closing chat socket");
            }
            SocketError::InvalidPayload
            | SocketError::ClientClosed(_)
            | SocketError::StreamClosed => {
                debug!(%connection_id, "chat socket closed");
            }
        }
    }
}

fn close_reason_for(error: SocketError) -> Option<Option<CloseReason>> {
    let reason = |code, description: &str| {
        Some(Some(CloseReason {
            code,
            description: Some(description.to_owned()),
        }))
    };
    match error {
        SocketError::HeartbeatTimeout => reason(CloseCode::Normal, "heartbeat timeout"),
        SocketError::Protocol(_) => reason(CloseCode::Protocol, "protocol error"),
        SocketError::InvalidPayload => reason(CloseCode::Policy, "invalid payload"),
        SocketError::SessionEnded => reason(CloseCode::Policy, "session closed"),
        SocketError::ChatReset => reason(CloseCode::Again, "chat reset; refetch history"),
        SocketError::ClientClosed(reason) => Some(reason),
        SocketError::StreamClosed | SocketError::Network(_) => None,
    }
}

async fn send_frame(socket: &mut Session, frame: &ServerFrame) -> Result<(), Closed> {
    match serde_json::to_string(frame) {
        Ok(body) => socket.text(body).await,
        Err(error) => {
            warn!(error = %error, "Failed to serialize WebSocket frame");
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
