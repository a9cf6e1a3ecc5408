//! Per-venue chat actor: the single writer of a venue's sequence counter.
//!
//! The actor also listens for presence closures and drops every connection
//! held by a session that closed, so a departed visitor stops receiving the
//! venue's messages.

use std::collections::HashMap;
use std::sync::Arc;

use mockable::Clock;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::domain::events::publish_best_effort;
use crate::domain::ports::{
    ChatHistoryStore, ChatHistoryStoreError, DomainEventSink, GatewayMetrics,
};
use crate::domain::presence::{PresenceTracker, SessionClosure};
use crate::domain::{
    ChatMessage, ChatMessageId, ChatText, DomainEvent, SequenceNumber, VenueId, VisitorSessionId,
};

use super::{ChatDelivery, ConnectError, ConnectionId, SendError};

pub(super) enum Command {
    Join {
        connection: ConnectionId,
        session_id: VisitorSessionId,
        outbound: mpsc::Sender<ChatDelivery>,
        reply: oneshot::Sender<Result<SequenceNumber, ConnectError>>,
    },
    Send {
        connection: ConnectionId,
        session_id: VisitorSessionId,
        text: ChatText,
        reply: oneshot::Sender<Result<ChatMessage, SendError>>,
    },
    Leave {
        connection: ConnectionId,
    },
}

struct Member {
    session_id: VisitorSessionId,
    outbound: mpsc::Sender<ChatDelivery>,
}

pub(super) struct VenueActor {
    venue_id: VenueId,
    commands: mpsc::Receiver<Command>,
    presence: Arc<PresenceTracker>,
    closures: broadcast::Receiver<SessionClosure>,
    history: Arc<dyn ChatHistoryStore>,
    events: Arc<dyn DomainEventSink>,
    metrics: Arc<dyn GatewayMetrics>,
    clock: Arc<dyn Clock>,
    // `None` until loaded, and again after a sequence gap.
    last: Option<SequenceNumber>,
    members: HashMap<ConnectionId, Member>,
}

impl VenueActor {
    pub(super) fn new(
        venue_id: VenueId,
        commands: mpsc::Receiver<Command>,
        presence: Arc<PresenceTracker>,
        history: Arc<dyn ChatHistoryStore>,
        events: Arc<dyn DomainEventSink>,
        metrics: Arc<dyn GatewayMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let closures = presence.subscribe_closures();
        Self {
            venue_id,
            commands,
            presence,
            closures,
            history,
            events,
            metrics,
            clock,
            last: None,
            members: HashMap::new(),
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            // Closures first: a send queued after a leave must not reach the
            // departed session.
            tokio::select! {
                biased;
                announced = self.closures.recv() => match announced {
                    Ok(closure) => self.session_closed(closure),
                    Err(RecvError::Lagged(missed)) => self.prune_closed_sessions(missed).await,
                    Err(RecvError::Closed) => {
                        self.closures = self.presence.subscribe_closures();
                    }
                },
                queued = self.commands.recv() => match queued {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        debug!(venue_id = %self.venue_id, "venue chat actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Join {
                connection,
                session_id,
                outbound,
                reply,
            } => self.join(connection, session_id, outbound, reply).await,
            Command::Send {
                connection,
                session_id,
                text,
                reply,
            } => {
                let outcome = self.send(connection, session_id, text).await;
                if reply.send(outcome).is_err() {
                    debug!(venue_id = %self.venue_id, %connection, "sender went away before the reply");
                }
            }
            Command::Leave { connection } => self.leave(connection),
        }
    }

    fn session_closed(&mut self, closure: SessionClosure) {
        if closure.venue_id != self.venue_id {
            return;
        }
        let before = self.members.len();
        self.members
            .retain(|_, member| member.session_id != closure.session_id);
        let dropped = before - self.members.len();
        if dropped > 0 {
            info!(
                venue_id = %self.venue_id,
                session_id = %closure.session_id,
                reason = closure.reason.as_str(),
                connections = dropped,
                "chat connections of a closed session dropped"
            );
        }
    }

    async fn prune_closed_sessions(&mut self, missed: u64) {
        warn!(venue_id = %self.venue_id, missed, "session closures missed; re-checking members");
        let mut closed = Vec::new();
        for (id, member) in &self.members {
            if self.presence.find_open(member.session_id).await.is_none() {
                closed.push(*id);
            }
        }
        for id in closed {
            self.members.remove(&id);
        }
    }

    async fn join(
        &mut self,
        connection: ConnectionId,
        session_id: VisitorSessionId,
        outbound: mpsc::Sender<ChatDelivery>,
        reply: oneshot::Sender<Result<SequenceNumber, ConnectError>>,
    ) {
        // Closures announced before this join was dequeued have already gone by.
        let admitted = if self.presence.find_open(session_id).await.is_none() {
            Err(ConnectError::SessionInvalid)
        } else {
            self.last_sequence()
                .await
                .map_err(|err| ConnectError::Unavailable(err.to_string()))
        };
        let watermark = match admitted {
            Ok(watermark) => watermark,
            Err(err) => {
                if reply.send(Err(err)).is_err() {
                    debug!(venue_id = %self.venue_id, %connection, "joiner went away");
                }
                return;
            }
        };
        if reply.send(Ok(watermark)).is_err() {
            debug!(venue_id = %self.venue_id, %connection, "joiner went away");
            return;
        }
        self.members.insert(
            connection,
            Member {
                session_id,
                outbound,
            },
        );
    }

    fn leave(&mut self, connection: ConnectionId) {
        if let Some(member) = self.members.remove(&connection) {
            info!(
                venue_id = %self.venue_id,
                %connection,
                session_id = %member.session_id,
                "chat connection left"
            );
        }
    }

    async fn send(
        &mut self,
        connection: ConnectionId,
        session_id: VisitorSessionId,
        text: ChatText,
    ) -> Result<ChatMessage, SendError> {
        if !self.members.contains_key(&connection) {
            return Err(SendError::Disconnected);
        }
        let last = self
            .last_sequence()
            .await
            .map_err(|err| SendError::Unavailable(err.to_string()))?;

        let message = ChatMessage {
            id: ChatMessageId::random(),
            venue_id: self.venue_id,
            sender_session_id: session_id,
            text,
            created_at: self.clock.utc(),
            sequence_number: last.next(),
        };
        match self.history.append(&message).await {
            Ok(()) => {}
            Err(ChatHistoryStoreError::SequenceConflict { sequence }) => {
                self.reset_after_gap(sequence);
                return Err(SendError::SequenceGap);
            }
            Err(err) => {
                warn!(venue_id = %self.venue_id, %connection, error = %err, "chat message not stored");
                return Err(SendError::Unavailable(err.to_string()));
            }
        }
        self.last = Some(message.sequence_number);
        self.fan_out(connection, &message).await;

        publish_best_effort(
            self.events.as_ref(),
            DomainEvent::MessageSent {
                venue_id: self.venue_id,
                session_id,
                sequence_number: message.sequence_number,
                at: message.created_at,
            },
        )
        .await;
        if let Err(error) = self.metrics.record_message_sent().await {
            warn!(%error, "message metric not recorded");
        }
        Ok(message)
    }

    async fn fan_out(&mut self, sender: ConnectionId, message: &ChatMessage) {
        let mut dropped = Vec::new();
        for (id, member) in &self.members {
            let delivery = if *id == sender {
                ChatDelivery::Ack(message.clone())
            } else {
                ChatDelivery::Message(message.clone())
            };
            match member.outbound.try_send(delivery) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped.push((*id, true)),
                Err(TrySendError::Closed(_)) => dropped.push((*id, false)),
            }
        }
        for (id, slow) in dropped {
            self.members.remove(&id);
            if slow {
                warn!(venue_id = %self.venue_id, connection = %id, "slow chat consumer disconnected");
                if let Err(error) = self.metrics.record_slow_consumer_disconnect().await {
                    warn!(%error, "slow consumer metric not recorded");
                }
            } else {
                debug!(venue_id = %self.venue_id, connection = %id, "pruned closed chat connection");
            }
        }
    }

    fn reset_after_gap(&mut self, sequence: u64) {
        error!(
            venue_id = %self.venue_id,
            sequence,
            expected_last = ?self.last,
            connections = self.members.len(),
            "chat sequence gap; dropping connections and reloading"
        );
        self.members.clear();
        self.last = None;
    }

    async fn last_sequence(&mut self) -> Result<SequenceNumber, ChatHistoryStoreError> {
        if let Some(last) = self.last {
            return Ok(last);
        }
        let last = self.history.last_sequence(&self.venue_id).await?;
        self.last = Some(last);
        Ok(last)
    }
}
