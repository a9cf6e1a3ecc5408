//! QR payload URLs: `{base}/v/{venue_id}?t={token}`.

use url::Url;

use super::{TokenValue, TokenValueError, VenueId};

/// Query parameter carrying the token.
const TOKEN_PARAM: &str = "t";
/// Path segment preceding the venue identifier.
const VENUE_SEGMENT: &str = "v";

/// Decoded QR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPayload {
    /// Venue the code belongs to.
    pub venue_id: VenueId,
    /// Presented token digits.
    pub token: TokenValue,
}

/// Failures decoding a QR payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessPayloadError {
    /// Not a URL at all.
    #[error("payload is not a valid URL: {0}")]
    InvalidUrl(String),
    /// The base URL cannot carry path segments.
    #[error("base URL cannot be used for access payloads")]
    UnsupportedBase,
    /// Missing `/v/{venue_id}` suffix.
    #[error("payload path does not name a venue")]
    MissingVenue,
    /// The venue segment is not a UUID.
    #[error("payload venue identifier is malformed")]
    MalformedVenue,
    /// Missing `t` parameter.
    #[error("payload does not carry a token")]
    MissingToken,
    /// The token is not a valid numeric code.
    #[error("payload token is malformed: {0}")]
    MalformedToken(#[from] TokenValueError),
}

impl AccessPayload {
    /// Render the payload below `base`, keeping any path prefix `base` has.
    ///
    /// # Errors
    /// Returns [`AccessPayloadError::UnsupportedBase`] for cannot-be-a-base
    /// URLs such as `mailto:`.
    ///
    /// # Examples
    /// ```
    /// use url::Url;
    /// use venue_gateway::domain::{AccessPayload, TokenValue, VenueId};
    ///
    /// let base = Url::parse("https://example.test/app/").expect("base url");
    /// let payload = AccessPayload {
    ///     venue_id: "6f1c1a8e-2f4e-4b47-9a6f-0c8b7a0f6f10".parse().expect("uuid"),
    ///     token: TokenValue::new("004217").expect("token"),
    /// };
    /// let url = payload.to_url(&base).expect("render");
    /// assert_eq!(
    ///     url.as_str(),
    ///     "https://example.test/app/v/6f1c1a8e-2f4e-4b47-9a6f-0c8b7a0f6f10?t=004217"
    /// );
    /// assert_eq!(AccessPayload::parse(url.as_str()), Ok(payload));
    /// ```
    pub fn to_url(&self, base: &Url) -> Result<Url, AccessPayloadError> {
        let mut url = base.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| AccessPayloadError::UnsupportedBase)?;
            segments
                .pop_if_empty()
                .push(VENUE_SEGMENT)
                .push(&self.venue_id.to_string());
        }
        url.query_pairs_mut()
            .append_pair(TOKEN_PARAM, self.token.as_str());
        Ok(url)
    }

    /// Decode a scanned payload.
    ///
    /// # Errors
    /// Returns an [`AccessPayloadError`] describing the first defect found.
    pub fn parse(raw: &str) -> Result<Self, AccessPayloadError> {
        let url = Url::parse(raw.trim())
            .map_err(|err| AccessPayloadError::InvalidUrl(err.to_string()))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let venue_raw = match segments.as_slice() {
            [.., marker, venue] if *marker == VENUE_SEGMENT => *venue,
            _ => return Err(AccessPayloadError::MissingVenue),
        };
        let venue_id = venue_raw
            .parse::<VenueId>()
            .map_err(|_| AccessPayloadError::MalformedVenue)?;
        let token_raw = url
            .query_pairs()
            .find(|(key, _)| key == TOKEN_PARAM)
            .map(|(_, value)| value.into_owned())
            .ok_or(AccessPayloadError::MissingToken)?;
        let token = TokenValue::new(token_raw)?;
        Ok(Self { venue_id, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const VENUE: &str = "6f1c1a8e-2f4e-4b47-9a6f-0c8b7a0f6f10";

    #[rstest]
    fn base_without_trailing_slash_renders_single_separator() {
        let base = Url::parse("https://example.test").expect("base url");
        let payload = AccessPayload {
            venue_id: VENUE.parse().expect("uuid"),
            token: TokenValue::new("123456").expect("token"),
        };
        let url = payload.to_url(&base).expect("render");
        assert_eq!(url.as_str(), format!("https://example.test/v/{VENUE}?t=123456"));
    }

    #[rstest]
    fn cannot_be_a_base_url_is_rejected() {
        let base = Url::parse("mailto:someone@example.test").expect("url");
        let payload = AccessPayload {
            venue_id: VENUE.parse().expect("uuid"),
            token: TokenValue::new("123456").expect("token"),
        };
        assert_eq!(payload.to_url(&base), Err(AccessPayloadError::UnsupportedBase));
    }

    #[rstest]
    #[case("not a url", "InvalidUrl")]
    #[case("https://example.test/x/123?t=123456", "MissingVenue")]
    #[case("https://example.test/v/pub?t=123456", "MalformedVenue")]
    #[case(&format!("https://example.test/v/{VENUE}"), "MissingToken")]
    #[case(&format!("https://example.test/v/{VENUE}?t=12ab56"), "MalformedToken")]
    fn parse_reports_first_defect(#[case] raw: &str, #[case] expected: &str) {
        let err = AccessPayload::parse(raw).expect_err("payload rejected");
        assert!(
            format!("{err:?}").starts_with(expected),
            "unexpected error {err:?}"
        );
    }
}
