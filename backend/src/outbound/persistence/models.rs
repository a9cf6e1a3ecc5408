//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain. Conversions into domain types live here so
//! every repository validates rows the same way.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::{
    ChatMessage, ChatMessageId, ChatText, EpochSequence, RotationFrequency, SequenceNumber,
    SessionCloseReason, TokenEpoch, TokenValue, Venue, VenueId, VisitorId, VisitorSession,
    VisitorSessionId,
};

use super::schema::{chat_messages, token_epochs, venues, visitor_sessions};

/// Failure converting a stored row into a domain value.
#[derive(Debug, thiserror::Error)]
#[error("invalid {column} in stored row: {message}")]
pub(crate) struct RowDecodeError {
    column: &'static str,
    message: String,
}

impl RowDecodeError {
    fn new(column: &'static str, message: impl ToString) -> Self {
        Self {
            column,
            message: message.to_string(),
        }
    }
}

/// Convert a domain counter into a `BIGINT` column value.
pub(crate) fn to_column(column: &'static str, value: u64) -> Result<i64, RowDecodeError> {
    i64::try_from(value).map_err(|err| RowDecodeError::new(column, err))
}

fn from_column(column: &'static str, value: i64) -> Result<u64, RowDecodeError> {
    u64::try_from(value).map_err(|err| RowDecodeError::new(column, err))
}

// ---------------------------------------------------------------------------
// Venues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = venues)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct VenueRow {
    pub id: Uuid,
    pub rotation_frequency: String,
    pub is_active: bool,
}

impl TryFrom<VenueRow> for Venue {
    type Error = RowDecodeError;

    fn try_from(row: VenueRow) -> Result<Self, Self::Error> {
        let rotation_frequency = row
            .rotation_frequency
            .parse::<RotationFrequency>()
            .map_err(|err| RowDecodeError::new("rotation_frequency", err))?;
        Ok(Self {
            id: VenueId::from_uuid(row.id),
            rotation_frequency,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = venues)]
pub(crate) struct NewVenueRow<'a> {
    pub id: Uuid,
    pub rotation_frequency: &'a str,
    pub is_active: bool,
}

impl<'a> From<&'a Venue> for NewVenueRow<'a> {
    fn from(venue: &'a Venue) -> Self {
        Self {
            id: *venue.id.as_uuid(),
            rotation_frequency: venue.rotation_frequency.as_str(),
            is_active: venue.is_active,
        }
    }
}

// ---------------------------------------------------------------------------
// Token epochs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = token_epochs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TokenEpochRow {
    pub venue_id: Uuid,
    pub epoch_sequence: i64,
    pub token_value: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<TokenEpochRow> for TokenEpoch {
    type Error = RowDecodeError;

    fn try_from(row: TokenEpochRow) -> Result<Self, Self::Error> {
        Ok(Self {
            venue_id: VenueId::from_uuid(row.venue_id),
            token_value: TokenValue::new(row.token_value)
                .map_err(|err| RowDecodeError::new("token_value", err))?,
            epoch_sequence: EpochSequence::new(from_column("epoch_sequence", row.epoch_sequence)?),
            generated_at: row.generated_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = token_epochs)]
pub(crate) struct NewTokenEpochRow<'a> {
    pub venue_id: Uuid,
    pub epoch_sequence: i64,
    pub token_value: &'a str,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<'a> TryFrom<&'a TokenEpoch> for NewTokenEpochRow<'a> {
    type Error = RowDecodeError;

    fn try_from(epoch: &'a TokenEpoch) -> Result<Self, Self::Error> {
        Ok(Self {
            venue_id: *epoch.venue_id.as_uuid(),
            epoch_sequence: to_column("epoch_sequence", epoch.epoch_sequence.get())?,
            token_value: epoch.token_value.as_str(),
            generated_at: epoch.generated_at,
            expires_at: epoch.expires_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Visitor sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = visitor_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct VisitorSessionRow {
    pub id: Uuid,
    pub venue_id: Uuid,
    pub visitor_id: Uuid,
    pub epoch_sequence_joined: i64,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

impl TryFrom<VisitorSessionRow> for VisitorSession {
    type Error = RowDecodeError;

    fn try_from(row: VisitorSessionRow) -> Result<Self, Self::Error> {
        let close_reason = row
            .close_reason
            .as_deref()
            .map(str::parse::<SessionCloseReason>)
            .transpose()
            .map_err(|err| RowDecodeError::new("close_reason", err))?;
        Ok(Self {
            id: VisitorSessionId::from_uuid(row.id),
            venue_id: VenueId::from_uuid(row.venue_id),
            visitor_id: VisitorId::from_uuid(row.visitor_id),
            epoch_sequence_joined: EpochSequence::new(from_column(
                "epoch_sequence_joined",
                row.epoch_sequence_joined,
            )?),
            joined_at: row.joined_at,
            last_seen_at: row.last_seen_at,
            left_at: row.left_at,
            close_reason,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = visitor_sessions)]
pub(crate) struct NewVisitorSessionRow {
    pub id: Uuid,
    pub venue_id: Uuid,
    pub visitor_id: Uuid,
    pub epoch_sequence_joined: i64,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl TryFrom<&VisitorSession> for NewVisitorSessionRow {
    type Error = RowDecodeError;

    fn try_from(session: &VisitorSession) -> Result<Self, Self::Error> {
        Ok(Self {
            id: *session.id.as_uuid(),
            venue_id: *session.venue_id.as_uuid(),
            visitor_id: *session.visitor_id.as_uuid(),
            epoch_sequence_joined: to_column(
                "epoch_sequence_joined",
                session.epoch_sequence_joined.get(),
            )?,
            joined_at: session.joined_at,
            last_seen_at: session.last_seen_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = chat_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ChatMessageRow {
    pub id: Uuid,
    pub venue_id: Uuid,
    pub sender_session_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub sequence_number: i64,
}

impl TryFrom<ChatMessageRow> for ChatMessage {
    type Error = RowDecodeError;

    fn try_from(row: ChatMessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ChatMessageId::from_uuid(row.id),
            venue_id: VenueId::from_uuid(row.venue_id),
            sender_session_id: VisitorSessionId::from_uuid(row.sender_session_id),
            text: ChatText::new(row.text).map_err(|err| RowDecodeError::new("text", err))?,
            created_at: row.created_at,
            sequence_number: SequenceNumber::new(from_column(
                "sequence_number",
                row.sequence_number,
            )?),
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = chat_messages)]
pub(crate) struct NewChatMessageRow<'a> {
    pub id: Uuid,
    pub venue_id: Uuid,
    pub sender_session_id: Uuid,
    pub text: &'a str,
    pub created_at: DateTime<Utc>,
    pub sequence_number: i64,
}

impl<'a> TryFrom<&'a ChatMessage> for NewChatMessageRow<'a> {
    type Error = RowDecodeError;

    fn try_from(message: &'a ChatMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            id: *message.id.as_uuid(),
            venue_id: *message.venue_id.as_uuid(),
            sender_session_id: *message.sender_session_id.as_uuid(),
            text: message.text.as_str(),
            created_at: message.created_at,
            sequence_number: to_column("sequence_number", message.sequence_number.get())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn nine_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("timestamp")
    }

    #[rstest]
    fn venue_rows_reject_unknown_frequencies() {
        let row = VenueRow {
            id: Uuid::new_v4(),
            rotation_frequency: "fortnightly".to_owned(),
            is_active: true,
        };

        let err = Venue::try_from(row).expect_err("unknown frequency");
        assert!(err.to_string().contains("rotation_frequency"));
    }

    #[rstest]
    fn epoch_rows_reject_negative_sequences(nine_am: DateTime<Utc>) {
        let row = TokenEpochRow {
            venue_id: Uuid::new_v4(),
            epoch_sequence: -1,
            token_value: "123456".to_owned(),
            generated_at: nine_am,
            expires_at: nine_am,
        };

        assert!(TokenEpoch::try_from(row).is_err());
    }

    #[rstest]
    fn session_rows_decode_close_reason(nine_am: DateTime<Utc>) {
        let row = VisitorSessionRow {
            id: Uuid::new_v4(),
            venue_id: Uuid::new_v4(),
            visitor_id: Uuid::new_v4(),
            epoch_sequence_joined: 3,
            joined_at: nine_am,
            last_seen_at: nine_am,
            left_at: Some(nine_am),
            close_reason: Some("idle_timeout".to_owned()),
        };

        let session = VisitorSession::try_from(row).expect("decodes");
        assert_eq!(session.close_reason, Some(SessionCloseReason::IdleTimeout));
        assert_eq!(session.epoch_sequence_joined, EpochSequence::new(3));
    }

    #[rstest]
    fn sequences_beyond_bigint_are_refused() {
        assert!(to_column("sequence_number", u64::MAX).is_err());
        assert_eq!(to_column("sequence_number", 42).expect("fits"), 42);
    }
}
