//! Shared WebSocket adapter state.
//!
//! The chat socket reuses [`HttpState`](crate::inbound::http::state::HttpState)
//! for the domain services; this module only adds what is specific to the
//! upgrade, the browser origin allow-list.

use url::Url;

/// Browser origins allowed to open the chat socket.
///
/// Entries are compared against the ASCII serialisation of the request's
/// `Origin` (`scheme://host[:port]`), lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedOrigins(Vec<String>);

impl AllowedOrigins {
    /// Allow-list from configured origin strings.
    #[must_use]
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            origins
                .into_iter()
                .map(|origin| normalise(origin.as_ref()))
                .filter(|origin| !origin.is_empty())
                .collect(),
        )
    }

    /// Whether `origin` is on the list.
    #[must_use]
    pub fn allows(&self, origin: &Url) -> bool {
        if origin.host_str().is_none() {
            return false;
        }
        let candidate = normalise(&origin.origin().ascii_serialization());
        self.0.iter().any(|allowed| *allowed == candidate)
    }
}

fn normalise(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}
