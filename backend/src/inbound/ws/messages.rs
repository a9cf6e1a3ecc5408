//! Wire-level frames for the chat socket.
//!
//! Every frame is a JSON object tagged by `type`. Clients send `send` and
//! `ping`; the server answers with `welcome`, `message`, `ack` and `error`.

use serde::{Deserialize, Serialize};

use crate::domain::{ChatConnection, Error, ErrorCode};
use crate::inbound::http::messages::ChatMessageBody;

/// Frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Post a message to the venue.
    Send {
        /// Message body.
        text: String,
    },
    /// Keep the visitor session alive.
    Ping,
}

/// Frame sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// First frame after the upgrade.
    ///
    /// Clients read history up to `watermark`; the first live `message`
    /// carries `watermark + 1`.
    Welcome {
        /// Identifier of this socket.
        connection_id: String,
        /// Venue the socket is joined to.
        venue_id: String,
        /// Visitor session backing the socket.
        session_id: String,
        /// Highest sequence already durable at join time.
        watermark: u64,
    },
    /// Another visitor's message.
    Message {
        /// The stored message.
        message: ChatMessageBody,
    },
    /// The client's own message, now stored.
    Ack {
        /// The stored message, with its sequence number.
        message: ChatMessageBody,
    },
    /// A request failed; the socket stays open unless a close frame follows.
    Error {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl ServerFrame {
    /// Greeting for a freshly joined connection.
    #[must_use]
    pub fn welcome(connection: &ChatConnection) -> Self {
        Self::Welcome {
            connection_id: connection.id().to_string(),
            venue_id: connection.venue_id().to_string(),
            session_id: connection.session_id().to_string(),
            watermark: connection.watermark().get(),
        }
    }
}

impl From<Error> for ServerFrame {
    fn from(value: Error) -> Self {
        Self::Error {
            code: value.code(),
            message: value.message().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use insta::assert_json_snapshot;
    use rstest::rstest;
    use uuid::Uuid;

    use crate::domain::{
        ChatMessage, ChatMessageId, ChatText, SequenceNumber, VenueId, VisitorSessionId,
    };

    fn stored_message() -> ChatMessage {
        ChatMessage {
            id: ChatMessageId::from_uuid(Uuid::nil()),
            venue_id: VenueId::from_uuid(Uuid::from_u128(1)),
            sender_session_id: VisitorSessionId::from_uuid(Uuid::from_u128(2)),
            text: ChatText::new("Hi").expect("valid text"),
            created_at: Utc
                .with_ymd_and_hms(2026, 3, 1, 21, 0, 0)
                .single()
                .expect("valid timestamp"),
            sequence_number: SequenceNumber::new(1),
        }
    }

    #[rstest]
    fn serialises_message_frame() {
        let frame = ServerFrame::Message {
            message: stored_message().into(),
        };

        assert_json_snapshot!(frame, @r#"
        {
          "type": "message",
          "message": {
            "id": "00000000-0000-0000-0000-000000000000",
            "venueId": "00000000-0000-0000-0000-000000000001",
            "senderSessionId": "00000000-0000-0000-0000-000000000002",
            "text": "Hi",
            "createdAt": "2026-03-01T21:00:00Z",
            "sequenceNumber": 1
          }
        }
        "#);
    }

    #[rstest]
    fn serialises_error_frame() {
        let frame = ServerFrame::from(Error::forbidden("session is no longer open"));

        assert_json_snapshot!(frame, @r#"
        {
          "type": "error",
          "code": "forbidden",
          "message": "session is no longer open"
        }
        "#);
    }

    #[rstest]
    #[case(r#"{"type":"send","text":"hello"}"#, ClientFrame::Send { text: "hello".to_owned() })]
    #[case(r#"{"type":"ping"}"#, ClientFrame::Ping)]
    fn parses_client_frames(#[case] raw: &str, #[case] expected: ClientFrame) {
        let frame: ClientFrame = serde_json::from_str(raw).expect("frame parses");
        assert_eq!(frame, expected);
    }

    #[rstest]
    #[case(r#"{"type":"shout","text":"hello"}"#)]
    #[case(r#"{"text":"hello"}"#)]
    #[case(r#"{"type":"send"}"#)]
    fn rejects_unknown_client_frames(#[case] raw: &str) {
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
    }
}
