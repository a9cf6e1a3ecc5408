//! Chat messages and history pages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{VenueId, VisitorSessionId};

/// Identifier of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatMessageId(Uuid);

impl ChatMessageId {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ChatMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-venue message position. `0` means "nothing yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Watermark of an empty history.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw sequence number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The number allocated after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Validated chat text: trimmed, non-empty, at most [`ChatText::MAX_CHARS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChatText(String);

/// Chat text validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatTextError {
    /// Nothing left after trimming.
    #[error("message text must not be empty")]
    Empty,
    /// Too many characters.
    #[error("message text must be at most {max} characters")]
    TooLong {
        /// Character limit.
        max: usize,
    },
}

impl ChatText {
    /// Character limit for a single message.
    pub const MAX_CHARS: usize = 1000;

    /// Trim and validate.
    ///
    /// # Errors
    /// Returns [`ChatTextError`] for blank or oversized text.
    ///
    /// # Examples
    /// ```
    /// use venue_gateway::domain::ChatText;
    ///
    /// let text = ChatText::new("  hi there ").expect("valid text");
    /// assert_eq!(text.as_str(), "hi there");
    /// ```
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ChatTextError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ChatTextError::Empty);
        }
        if trimmed.chars().count() > Self::MAX_CHARS {
            return Err(ChatTextError::TooLong {
                max: Self::MAX_CHARS,
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Borrow the text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for ChatText {
    type Error = ChatTextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChatText> for String {
    fn from(value: ChatText) -> Self {
        value.0
    }
}

/// Immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message identifier.
    pub id: ChatMessageId,
    /// Venue whose log holds the message.
    pub venue_id: VenueId,
    /// Sending session.
    pub sender_session_id: VisitorSessionId,
    /// Message body.
    pub text: ChatText,
    /// Append instant.
    pub created_at: DateTime<Utc>,
    /// Position in the venue log.
    pub sequence_number: SequenceNumber,
}

/// Range request against a venue's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Return messages strictly after this sequence.
    pub since: SequenceNumber,
    /// Maximum page size.
    pub limit: usize,
}

impl HistoryQuery {
    /// Default page size.
    pub const DEFAULT_LIMIT: usize = 50;
    /// Largest accepted page size.
    pub const MAX_LIMIT: usize = 200;

    /// Build a query, clamping `limit` into `1..=MAX_LIMIT`.
    #[must_use]
    pub fn new(since: Option<SequenceNumber>, limit: Option<usize>) -> Self {
        Self {
            since: since.unwrap_or(SequenceNumber::ZERO),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }
}

/// Ordered slice of a venue's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Messages in ascending sequence order.
    pub messages: Vec<ChatMessage>,
    /// Highest durable sequence for the venue when the page was read.
    pub watermark: SequenceNumber,
    /// Whether more messages follow the last one in `messages`.
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case("   \n\t")]
    fn blank_text_is_rejected(#[case] raw: &str) {
        assert_eq!(ChatText::new(raw), Err(ChatTextError::Empty));
    }

    #[rstest]
    fn limit_counts_characters_not_bytes() {
        let at_limit = "é".repeat(ChatText::MAX_CHARS);
        assert!(ChatText::new(&at_limit).is_ok());

        let over = "a".repeat(ChatText::MAX_CHARS + 1);
        assert_eq!(
            ChatText::new(over),
            Err(ChatTextError::TooLong {
                max: ChatText::MAX_CHARS
            })
        );
    }

    #[rstest]
    #[case(None, None, 0, HistoryQuery::DEFAULT_LIMIT)]
    #[case(Some(7), Some(0), 7, 1)]
    #[case(Some(3), Some(10_000), 3, HistoryQuery::MAX_LIMIT)]
    fn history_query_clamps_limit(
        #[case] since: Option<u64>,
        #[case] limit: Option<usize>,
        #[case] expected_since: u64,
        #[case] expected_limit: usize,
    ) {
        let query = HistoryQuery::new(since.map(SequenceNumber::new), limit);
        assert_eq!(query.since, SequenceNumber::new(expected_since));
        assert_eq!(query.limit, expected_limit);
    }
}
