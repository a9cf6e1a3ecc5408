//! Port verifying visitor credentials issued by the upstream identity service.

use crate::domain::VisitorId;

use super::define_port_error;

define_port_error! {
    /// Reasons a credential is refused.
    pub enum VisitorAuthError {
        /// No credential was presented.
        Missing => "visitor credential missing",
        /// The credential is not in the expected shape.
        Malformed => "visitor credential malformed",
        /// The credential failed verification.
        Rejected => "visitor credential rejected",
    }
}

/// Turns an opaque credential into a verified visitor identity.
#[cfg_attr(test, mockall::automock)]
pub trait VisitorAuthenticator: Send + Sync {
    /// Verify `credential`.
    fn authenticate(&self, credential: &str) -> Result<VisitorId, VisitorAuthError>;
}
