//! Rotating access tokens and their validity windows.
//!
//! A [`TokenEpoch`] is one generation of a venue's access code. Status is never
//! stored: an epoch is [`EpochStatus::Active`] while its sequence equals the
//! venue's highest sequence and [`EpochStatus::Superseded`] afterwards.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use super::VenueId;

/// Number of digits in a venue access token.
///
/// ## Invariants
/// - Always within [`TokenWidth::MIN`]..=[`TokenWidth::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenWidth(u8);

/// Errors raised when constructing token values and widths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenValueError {
    /// Width outside the supported range.
    #[error("token width must be between {min} and {max} digits, got {actual}")]
    WidthOutOfRange {
        /// Smallest accepted width.
        min: u8,
        /// Largest accepted width.
        max: u8,
        /// Width that was supplied.
        actual: usize,
    },
    /// The token contained something other than ASCII digits.
    #[error("token must contain only ASCII digits")]
    NonDigit,
}

impl TokenWidth {
    /// Smallest supported token width.
    pub const MIN: u8 = 4;
    /// Largest supported token width.
    pub const MAX: u8 = 12;

    /// Validate a width.
    ///
    /// # Errors
    /// Returns [`TokenValueError::WidthOutOfRange`] outside the supported range.
    pub fn new(width: u8) -> Result<Self, TokenValueError> {
        if (Self::MIN..=Self::MAX).contains(&width) {
            Ok(Self(width))
        } else {
            Err(TokenValueError::WidthOutOfRange {
                min: Self::MIN,
                max: Self::MAX,
                actual: usize::from(width),
            })
        }
    }

    /// Digits per token.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Exclusive upper bound of the numeric token space (`10^width`).
    #[must_use]
    pub fn space(self) -> u64 {
        10_u64.pow(u32::from(self.0))
    }
}

impl Default for TokenWidth {
    fn default() -> Self {
        Self(6)
    }
}

/// Fixed-width numeric access token. Leading zeros are significant.
///
/// # Examples
/// ```
/// use venue_gateway::domain::TokenValue;
///
/// let token = TokenValue::new("004217").expect("valid token");
/// assert!(token.matches("004217"));
/// assert!(!token.matches("4217"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenValue(String);

impl TokenValue {
    /// Validate and wrap a token.
    ///
    /// # Errors
    /// Rejects non-digit content and lengths outside the supported widths.
    pub fn new(value: impl Into<String>) -> Result<Self, TokenValueError> {
        let value = value.into();
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenValueError::NonDigit);
        }
        let len = value.len();
        if len < usize::from(TokenWidth::MIN) || len > usize::from(TokenWidth::MAX) {
            return Err(TokenValueError::WidthOutOfRange {
                min: TokenWidth::MIN,
                max: TokenWidth::MAX,
                actual: len,
            });
        }
        Ok(Self(value))
    }

    /// Render `number` zero-padded to `width` digits.
    ///
    /// Numbers wider than `width` are reduced modulo the token space.
    #[must_use]
    pub fn from_number(number: u64, width: TokenWidth) -> Self {
        let reduced = number % width.space();
        Self(format!("{reduced:0w$}", w = usize::from(width.get())))
    }

    /// Borrow the digits.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Compare against a presented token without leaking timing on content.
    #[must_use]
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl fmt::Debug for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TokenValue").field(&"***").finish()
    }
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TokenValue {
    type Error = TokenValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TokenValue> for String {
    fn from(value: TokenValue) -> Self {
        value.0
    }
}

/// Monotonic per-venue epoch counter. The first epoch is `1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EpochSequence(u64);

impl EpochSequence {
    /// Sequence of the epoch created on venue activation.
    pub const FIRST: Self = Self(1);

    /// Wrap a raw sequence.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The sequence that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Number of rotations between `self` and a later `active` sequence.
    #[must_use]
    pub const fn rotations_until(self, active: Self) -> u64 {
        active.0.saturating_sub(self.0)
    }
}

impl fmt::Display for EpochSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle label derived from sequences, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochStatus {
    /// Highest sequence for the venue.
    Active,
    /// Replaced by a later rotation.
    Superseded,
}

/// One generation of a venue's access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEpoch {
    /// Owning venue.
    pub venue_id: VenueId,
    /// Digits displayed on the venue's QR code.
    pub token_value: TokenValue,
    /// Position in the venue's rotation history.
    pub epoch_sequence: EpochSequence,
    /// Moment the epoch was created.
    pub generated_at: DateTime<Utc>,
    /// Nominal end of validity.
    pub expires_at: DateTime<Utc>,
}

impl TokenEpoch {
    /// Status relative to the venue's active sequence.
    #[must_use]
    pub fn status_against(&self, active: EpochSequence) -> EpochStatus {
        if self.epoch_sequence >= active {
            EpochStatus::Active
        } else {
            EpochStatus::Superseded
        }
    }

    /// `true` while `now` has not passed `expires_at`.
    #[must_use]
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// Whole seconds left before expiry, floored at zero.
    #[must_use]
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }

    /// Whether `successor` replaced this epoch only once it had run its full
    /// window (a scheduled rotation) rather than early (a manual rotation).
    #[must_use]
    pub fn ran_to_expiry_before(&self, successor: &Self) -> bool {
        successor.generated_at >= self.expires_at
    }
}

/// Consistent read view of a venue's rotation state.
///
/// Published atomically after each committed mutation so readers never wait on
/// the venue's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochSnapshot {
    /// Active epoch.
    pub current: TokenEpoch,
    /// The epoch `current` superseded, if any.
    pub previous: Option<TokenEpoch>,
    /// Set while rotation keeps failing; clears on the next success.
    pub rotation_stalled: bool,
}

impl EpochSnapshot {
    /// Snapshot for a venue whose history starts at `current`.
    #[must_use]
    pub const fn initial(current: TokenEpoch) -> Self {
        Self {
            current,
            previous: None,
            rotation_stalled: false,
        }
    }

    /// Snapshot after `next` supersedes the current epoch.
    #[must_use]
    pub fn advanced(&self, next: TokenEpoch) -> Self {
        Self {
            current: next,
            previous: Some(self.current.clone()),
            rotation_stalled: false,
        }
    }

    /// Copy of the snapshot with the stall flag set.
    #[must_use]
    pub fn stalled(&self) -> Self {
        Self {
            rotation_stalled: true,
            ..self.clone()
        }
    }
}
