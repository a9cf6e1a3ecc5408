//! Domain events published to the [`DomainEventSink`](super::ports::DomainEventSink).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::ports::DomainEventSink;
use super::{
    EpochSequence, SequenceNumber, SessionCloseReason, VenueId, VisitorId, VisitorSessionId,
};

/// What triggered a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTrigger {
    /// First epoch of a newly active venue.
    Activation,
    /// The scheduler reached `expires_at`.
    Scheduled,
    /// An operator asked for a new code.
    Manual,
}

impl RotationTrigger {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

/// Facts other systems may react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A scan opened a new visitor session.
    SessionOpened {
        /// Venue.
        venue_id: VenueId,
        /// New session.
        session_id: VisitorSessionId,
        /// Visitor.
        visitor_id: VisitorId,
        /// Epoch the session joined under.
        epoch_sequence: EpochSequence,
        /// Opening instant.
        at: DateTime<Utc>,
    },
    /// A session closed.
    SessionClosed {
        /// Venue.
        venue_id: VenueId,
        /// Closed session.
        session_id: VisitorSessionId,
        /// Why it closed.
        reason: SessionCloseReason,
        /// Stay length in seconds.
        stay_seconds: i64,
        /// Closing instant.
        at: DateTime<Utc>,
    },
    /// A new epoch became active.
    EpochRotated {
        /// Venue.
        venue_id: VenueId,
        /// New active sequence.
        epoch_sequence: EpochSequence,
        /// Cause of the rotation.
        trigger: RotationTrigger,
        /// Expiry of the new epoch.
        expires_at: DateTime<Utc>,
    },
    /// A chat message became durable.
    MessageSent {
        /// Venue.
        venue_id: VenueId,
        /// Sending session.
        session_id: VisitorSessionId,
        /// Allocated sequence.
        sequence_number: SequenceNumber,
        /// Append instant.
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Event name as used in the audit log.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SessionOpened { .. } => "session_opened",
            Self::SessionClosed { .. } => "session_closed",
            Self::EpochRotated { .. } => "epoch_rotated",
            Self::MessageSent { .. } => "message_sent",
        }
    }

    /// Venue the event concerns.
    #[must_use]
    pub const fn venue_id(&self) -> VenueId {
        match self {
            Self::SessionOpened { venue_id, .. }
            | Self::SessionClosed { venue_id, .. }
            | Self::EpochRotated { venue_id, .. }
            | Self::MessageSent { venue_id, .. } => *venue_id,
        }
    }
}

/// Publish `event`, logging instead of failing when the sink refuses it.
pub(crate) async fn publish_best_effort(sink: &dyn DomainEventSink, event: DomainEvent) {
    if let Err(error) = sink.publish(&event).await {
        warn!(
            event = event.name(),
            venue_id = %event.venue_id(),
            %error,
            "domain event dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use uuid::Uuid;

    #[rstest]
    fn serialises_with_type_tag() {
        let at = Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        let event = DomainEvent::EpochRotated {
            venue_id: VenueId::from_uuid(Uuid::nil()),
            epoch_sequence: EpochSequence::new(2),
            trigger: RotationTrigger::Manual,
            expires_at: at,
        };

        insta::assert_json_snapshot!(event, @r#"
        {
          "type": "epoch_rotated",
          "venue_id": "00000000-0000-0000-0000-000000000000",
          "epoch_sequence": 2,
          "trigger": "manual",
          "expires_at": "2026-03-01T09:00:00Z"
        }
        "#);
        assert_eq!(event.name(), "epoch_rotated");
    }
}
