//! Live chat per venue.
//!
//! Every venue gets one actor task that owns the venue's sequence counter and
//! fan-out set. Sends are appended to the [`ChatHistoryStore`] before any
//! connection sees them, and each connection reads from its own bounded queue,
//! so all members observe one gap-free stream in the same order. A connection
//! whose queue is full is dropped rather than buffered without bound.
//!
//! Joining and sending both require an open session at an active venue that
//! has not yet outlived two rotations. When presence closes a session, its
//! connections are dropped and [`ChatConnection::recv`] returns `None`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::epoch_manager::TokenEpochManager;
use crate::domain::ports::{
    ChatHistoryStore, ChatHistoryStoreError, DomainEventSink, GatewayMetrics, VenueDirectory,
    VisitorAuthError, VisitorAuthenticator,
};
use crate::domain::presence::PresenceTracker;
use crate::domain::{
    ChatMessage, ChatText, ChatTextError, Error, HistoryPage, HistoryQuery, SequenceNumber,
    VenueId, VisitorId, VisitorSession, VisitorSessionId,
};

mod actor;

use actor::{Command, VenueActor};

/// Identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Something queued for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDelivery {
    /// Another member's message.
    Message(ChatMessage),
    /// This connection's own message, now durable.
    Ack(ChatMessage),
}

impl ChatDelivery {
    /// The delivered message.
    #[must_use]
    pub fn message(&self) -> &ChatMessage {
        match self {
            Self::Message(message) | Self::Ack(message) => message,
        }
    }
}

/// Gateway tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatGatewayConfig {
    /// Deliveries buffered per connection before it counts as slow.
    pub outbound_capacity: usize,
    /// Commands buffered per venue actor.
    pub command_capacity: usize,
    /// Longest wait for a venue actor to admit a connection.
    pub join_timeout: Duration,
}

impl Default for ChatGatewayConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 64,
            command_capacity: 256,
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Driven ports used by the gateway.
pub struct ChatGatewayPorts {
    /// Durable chat log.
    pub history: Arc<dyn ChatHistoryStore>,
    /// Visitor credential verification.
    pub authenticator: Arc<dyn VisitorAuthenticator>,
    /// Venue configuration, for the active flag.
    pub venues: Arc<dyn VenueDirectory>,
    /// Domain event sink.
    pub events: Arc<dyn DomainEventSink>,
    /// Metrics exporter.
    pub metrics: Arc<dyn GatewayMetrics>,
}

/// Connection refusals.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The credential did not verify.
    #[error("visitor credential refused: {0}")]
    Unauthorized(#[from] VisitorAuthError),
    /// The session is not open, belongs to another venue or to another
    /// visitor, or has outlived two rotations.
    #[error("session is not open for this venue and visitor")]
    SessionInvalid,
    /// The venue is switched off.
    #[error("venue is not accepting visitors")]
    VenueInactive,
    /// The venue's actor did not answer in time.
    #[error("venue chat is busy")]
    Busy,
    /// The chat log could not be read.
    #[error("chat unavailable: {0}")]
    Unavailable(String),
}

impl From<ConnectError> for Error {
    fn from(value: ConnectError) -> Self {
        match value {
            ConnectError::Unauthorized(_) => Self::unauthorized("visitor credential refused"),
            ConnectError::SessionInvalid => Self::forbidden("session is not open for this venue"),
            ConnectError::VenueInactive => Self::forbidden("venue is not accepting visitors"),
            ConnectError::Busy | ConnectError::Unavailable(_) => {
                Self::service_unavailable("chat is temporarily unavailable")
            }
        }
    }
}

/// Send failures. Nothing was broadcast when any of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The text failed validation.
    #[error(transparent)]
    InvalidText(#[from] ChatTextError),
    /// The sender's session has closed or outlived two rotations.
    #[error("session is no longer open")]
    SessionInvalid,
    /// The venue was switched off after the connection joined.
    #[error("venue is not accepting visitors")]
    VenueInactive,
    /// The connection was dropped by the gateway.
    #[error("connection is closed")]
    Disconnected,
    /// The message could not be stored.
    #[error("message not stored: {0}")]
    Unavailable(String),
    /// The store and the venue counter disagreed; the venue was reset.
    #[error("chat sequence out of step with the store")]
    SequenceGap,
}

impl From<SendError> for Error {
    fn from(value: SendError) -> Self {
        match value {
            SendError::InvalidText(err) => Self::invalid_request(err.to_string()),
            SendError::SessionInvalid => Self::forbidden("session is no longer open"),
            SendError::VenueInactive => Self::forbidden("venue is not accepting visitors"),
            SendError::Disconnected => Self::conflict("connection is closed"),
            SendError::Unavailable(_) | SendError::SequenceGap => {
                Self::service_unavailable("message not sent, try again")
            }
        }
    }
}

/// History read failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chat history unavailable: {0}")]
pub struct HistoryError(#[from] ChatHistoryStoreError);

impl From<HistoryError> for Error {
    fn from(_: HistoryError) -> Self {
        Self::service_unavailable("chat history is temporarily unavailable")
    }
}

enum Refusal {
    SessionInvalid,
    VenueInactive,
    Unavailable(String),
}

impl From<Refusal> for ConnectError {
    fn from(value: Refusal) -> Self {
        match value {
            Refusal::SessionInvalid => Self::SessionInvalid,
            Refusal::VenueInactive => Self::VenueInactive,
            Refusal::Unavailable(message) => Self::Unavailable(message),
        }
    }
}

impl From<Refusal> for SendError {
    fn from(value: Refusal) -> Self {
        match value {
            Refusal::SessionInvalid => Self::SessionInvalid,
            Refusal::VenueInactive => Self::VenueInactive,
            Refusal::Unavailable(message) => Self::Unavailable(message),
        }
    }
}

/// Decides whether a session may take part in a venue's chat right now.
struct Admission {
    presence: Arc<PresenceTracker>,
    venues: Arc<dyn VenueDirectory>,
    epochs: Arc<TokenEpochManager>,
}

impl Admission {
    async fn check(
        &self,
        venue_id: VenueId,
        session_id: VisitorSessionId,
    ) -> Result<VisitorSession, Refusal> {
        match self.venues.find(&venue_id).await {
            Ok(Some(venue)) if venue.is_active => {}
            Ok(Some(_)) => return Err(Refusal::VenueInactive),
            Ok(None) => return Err(Refusal::SessionInvalid),
            Err(err) => return Err(Refusal::Unavailable(err.to_string())),
        }
        let session = self
            .presence
            .find_open(session_id)
            .await
            .filter(|session| session.venue_id == venue_id)
            .ok_or(Refusal::SessionInvalid)?;
        // The sweeper closes these on its next pass.
        if self
            .epochs
            .peek(venue_id)
            .is_some_and(|snapshot| session.outlived_epochs(snapshot.current.epoch_sequence))
        {
            return Err(Refusal::SessionInvalid);
        }
        Ok(session)
    }
}

/// Entry point for chat connections and history reads.
pub struct ChatGateway {
    admission: Arc<Admission>,
    history: Arc<dyn ChatHistoryStore>,
    authenticator: Arc<dyn VisitorAuthenticator>,
    events: Arc<dyn DomainEventSink>,
    metrics: Arc<dyn GatewayMetrics>,
    clock: Arc<dyn Clock>,
    config: ChatGatewayConfig,
    actors: Mutex<HashMap<VenueId, mpsc::Sender<Command>>>,
}

impl ChatGateway {
    /// Build a gateway. Venue actors start on first use.
    #[must_use]
    pub fn new(
        presence: Arc<PresenceTracker>,
        epochs: Arc<TokenEpochManager>,
        ports: ChatGatewayPorts,
        clock: Arc<dyn Clock>,
        config: ChatGatewayConfig,
    ) -> Self {
        Self {
            admission: Arc::new(Admission {
                presence,
                venues: ports.venues,
                epochs,
            }),
            history: ports.history,
            authenticator: ports.authenticator,
            events: ports.events,
            metrics: ports.metrics,
            clock,
            config,
            actors: Mutex::new(HashMap::new()),
        }
    }

    /// Verify a visitor credential.
    ///
    /// # Errors
    /// [`ConnectError::Unauthorized`] when the credential does not verify.
    pub fn authenticate(&self, credential: &str) -> Result<VisitorId, ConnectError> {
        Ok(self.authenticator.authenticate(credential)?)
    }

    /// The open session `session_id` if `visitor_id` owns it and may take
    /// part in `venue_id`'s chat right now.
    ///
    /// # Errors
    /// [`ConnectError::SessionInvalid`], [`ConnectError::VenueInactive`] or
    /// [`ConnectError::Unavailable`] when the venue directory cannot be read.
    pub async fn authorize(
        &self,
        venue_id: VenueId,
        session_id: VisitorSessionId,
        visitor_id: VisitorId,
    ) -> Result<VisitorSession, ConnectError> {
        let session = self.admission.check(venue_id, session_id).await?;
        if session.visitor_id != visitor_id {
            return Err(ConnectError::SessionInvalid);
        }
        Ok(session)
    }

    /// Join `venue_id`'s chat as the owner of `session_id`.
    ///
    /// The returned connection's watermark is the last durable sequence when
    /// it joined; its first live delivery carries `watermark + 1`.
    ///
    /// # Errors
    /// [`ConnectError::Unauthorized`], [`ConnectError::SessionInvalid`],
    /// [`ConnectError::VenueInactive`], [`ConnectError::Busy`] or
    /// [`ConnectError::Unavailable`].
    pub async fn connect(
        &self,
        venue_id: VenueId,
        session_id: VisitorSessionId,
        credential: &str,
    ) -> Result<ChatConnection, ConnectError> {
        let visitor_id = self.authenticate(credential)?;
        let session = self.authorize(venue_id, session_id, visitor_id).await?;

        let id = ConnectionId::random();
        let (outbound, inbox) = mpsc::channel(self.config.outbound_capacity.max(1));
        let (reply, answer) = oneshot::channel();
        let commands = self.actor(venue_id);
        let join = Command::Join {
            connection: id,
            session_id: session.id,
            outbound,
            reply,
        };
        if commands.send(join).await.is_err() {
            self.forget_actor(venue_id, &commands);
            return Err(ConnectError::Unavailable("venue chat worker stopped".to_owned()));
        }
        let watermark = match tokio::time::timeout(self.config.join_timeout, answer).await {
            Err(_) => return Err(ConnectError::Busy),
            Ok(Err(_)) => {
                return Err(ConnectError::Unavailable("venue chat worker stopped".to_owned()));
            }
            Ok(Ok(result)) => result?,
        };

        info!(%venue_id, %session_id, connection_id = %id, %watermark, "chat connection joined");
        Ok(ChatConnection {
            id,
            venue_id,
            session_id,
            visitor_id,
            connected_at: self.clock.utc(),
            watermark,
            inbox,
            commands,
            admission: Arc::clone(&self.admission),
        })
    }

    /// A page of `venue_id`'s history after `query.since`.
    ///
    /// # Errors
    /// [`HistoryError`] when the store cannot be read.
    pub async fn history(
        &self,
        venue_id: VenueId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, HistoryError> {
        let watermark = self.history.last_sequence(&venue_id).await?;
        let mut messages = self
            .history
            .read_after(&venue_id, query.since, query.limit.saturating_add(1))
            .await?;
        messages.retain(|message| message.sequence_number <= watermark);
        let has_more = messages.len() > query.limit;
        messages.truncate(query.limit);
        Ok(HistoryPage {
            messages,
            watermark,
            has_more,
        })
    }

    fn actor(&self, venue_id: VenueId) -> mpsc::Sender<Command> {
        let mut actors = self.actors.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(commands) = actors.get(&venue_id).filter(|tx| !tx.is_closed()) {
            return commands.clone();
        }
        let (commands, rx) = mpsc::channel(self.config.command_capacity.max(1));
        let actor = VenueActor::new(
            venue_id,
            rx,
            Arc::clone(&self.admission.presence),
            Arc::clone(&self.history),
            Arc::clone(&self.events),
            Arc::clone(&self.metrics),
            Arc::clone(&self.clock),
        );
        tokio::spawn(actor.run());
        debug!(%venue_id, "venue chat actor started");
        actors.insert(venue_id, commands.clone());
        commands
    }

    fn forget_actor(&self, venue_id: VenueId, stale: &mpsc::Sender<Command>) {
        let mut actors = self.actors.lock().unwrap_or_else(PoisonError::into_inner);
        if actors
            .get(&venue_id)
            .is_some_and(|current| current.same_channel(stale))
        {
            actors.remove(&venue_id);
        }
    }
}

/// One visitor's live link to a venue's chat.
///
/// Dropping the connection leaves the fan-out set; the visitor session stays
/// open.
pub struct ChatConnection {
    id: ConnectionId,
    venue_id: VenueId,
    session_id: VisitorSessionId,
    visitor_id: VisitorId,
    connected_at: DateTime<Utc>,
    watermark: SequenceNumber,
    inbox: mpsc::Receiver<ChatDelivery>,
    commands: mpsc::Sender<Command>,
    admission: Arc<Admission>,
}

impl ChatConnection {
    /// Connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Venue joined.
    #[must_use]
    pub fn venue_id(&self) -> VenueId {
        self.venue_id
    }

    /// Session that authorised the connection.
    #[must_use]
    pub fn session_id(&self) -> VisitorSessionId {
        self.session_id
    }

    /// Visitor owning the session.
    #[must_use]
    pub fn visitor_id(&self) -> VisitorId {
        self.visitor_id
    }

    /// When the connection joined.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Last durable sequence when the connection joined.
    #[must_use]
    pub fn watermark(&self) -> SequenceNumber {
        self.watermark
    }

    /// Next delivery, or `None` once the gateway has dropped the connection.
    pub async fn recv(&mut self) -> Option<ChatDelivery> {
        self.inbox.recv().await
    }

    /// Whether the backing session still counts as present.
    pub async fn session_open(&self) -> bool {
        self.admission
            .presence
            .find_open(self.session_id)
            .await
            .is_some()
    }

    /// Append `text` to the venue's log and broadcast it.
    ///
    /// The sender also receives the stored message as a
    /// [`ChatDelivery::Ack`] through [`ChatConnection::recv`]. A stored
    /// message counts as a heartbeat for the sender's session.
    ///
    /// # Errors
    /// See [`SendError`].
    pub async fn send(&self, text: &str) -> Result<ChatMessage, SendError> {
        let text = ChatText::new(text)?;
        self.admission.check(self.venue_id, self.session_id).await?;
        let (reply, answer) = oneshot::channel();
        let command = Command::Send {
            connection: self.id,
            session_id: self.session_id,
            text,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return Err(SendError::Disconnected);
        }
        let sent = answer.await.unwrap_or_else(|_| {
            Err(SendError::Unavailable("venue chat worker stopped".to_owned()))
        })?;
        if let Err(error) = self.admission.presence.heartbeat(self.session_id).await {
            debug!(session_id = %self.session_id, %error, "send not counted as a heartbeat");
        }
        Ok(sent)
    }
}

impl Drop for ChatConnection {
    fn drop(&mut self) {
        if self
            .commands
            .try_send(Command::Leave {
                connection: self.id,
            })
            .is_err()
        {
            warn!(connection_id = %self.id, "leave not queued; fan-out will prune the connection");
        }
    }
}
