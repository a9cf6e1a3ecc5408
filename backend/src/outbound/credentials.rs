//! Visitor credentials signed with a shared secret.
//!
//! The upstream identity service hands visitors a credential of the form
//! `{visitor_uuid}.{hex(sha256(secret || visitor_uuid))}`. Verification
//! recomputes the digest and compares it in constant time.

use std::io;
use std::path::Path;

use cap_std::{ambient_authority, fs::Dir};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::domain::VisitorId;
use crate::domain::ports::{VisitorAuthError, VisitorAuthenticator};

/// Shortest secret accepted for signing.
pub const MIN_SECRET_LEN: usize = 32;

/// Failures building a [`SignedVisitorAuthenticator`].
#[derive(Debug, thiserror::Error)]
pub enum CredentialSecretError {
    /// The secret file could not be read.
    #[error("failed to read credential secret: {0}")]
    Io(#[from] io::Error),
    /// The secret is too short to sign with.
    #[error("credential secret too short: need >= {min_len} bytes, got {length}")]
    TooShort {
        /// Bytes provided.
        length: usize,
        /// Bytes required.
        min_len: usize,
    },
}

/// Verifies and issues signed visitor credentials.
pub struct SignedVisitorAuthenticator {
    secret: Zeroizing<Vec<u8>>,
}

impl SignedVisitorAuthenticator {
    /// Build from raw secret bytes.
    ///
    /// # Errors
    /// Returns [`CredentialSecretError::TooShort`] for secrets under
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, CredentialSecretError> {
        let secret = Zeroizing::new(secret.into());
        if secret.len() < MIN_SECRET_LEN {
            return Err(CredentialSecretError::TooShort {
                length: secret.len(),
                min_len: MIN_SECRET_LEN,
            });
        }
        Ok(Self { secret })
    }

    /// Read the secret from a file. Trailing newlines are ignored.
    ///
    /// # Errors
    /// Returns [`CredentialSecretError`] when the file is unreadable or the
    /// secret is too short.
    pub fn from_secret_file(path: &Path) -> Result<Self, CredentialSecretError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "secret path has no file name")
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
        let mut bytes = Zeroizing::new(dir.read(file_name)?);
        while bytes.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            bytes.pop();
        }
        Self::new(bytes.as_slice())
    }

    /// Credential a visitor would present for `visitor`.
    #[must_use]
    pub fn issue(&self, visitor: VisitorId) -> String {
        let uuid = visitor.as_uuid().to_string();
        format!("{uuid}.{}", hex::encode(self.signature(&uuid)))
    }

    fn signature(&self, uuid: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_slice());
        hasher.update(uuid.as_bytes());
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for SignedVisitorAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedVisitorAuthenticator")
            .field("secret", &"***")
            .finish()
    }
}

impl VisitorAuthenticator for SignedVisitorAuthenticator {
    fn authenticate(&self, credential: &str) -> Result<VisitorId, VisitorAuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(VisitorAuthError::missing());
        }
        let (raw_id, raw_signature) = credential
            .split_once('.')
            .ok_or_else(VisitorAuthError::malformed)?;
        let uuid = Uuid::parse_str(raw_id).map_err(|_| VisitorAuthError::malformed())?;
        let presented = hex::decode(raw_signature).map_err(|_| VisitorAuthError::malformed())?;

        let expected = self.signature(&uuid.to_string());
        if bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            Ok(VisitorId::from_uuid(uuid))
        } else {
            Err(VisitorAuthError::rejected())
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn authenticator() -> SignedVisitorAuthenticator {
        SignedVisitorAuthenticator::new(vec![7_u8; MIN_SECRET_LEN]).expect("secret")
    }

    #[rstest]
    fn issued_credentials_verify(authenticator: SignedVisitorAuthenticator) {
        let visitor = VisitorId::random();
        let credential = authenticator.issue(visitor);

        assert_eq!(authenticator.authenticate(&credential), Ok(visitor));
    }

    #[rstest]
    fn credential_from_another_secret_is_rejected(authenticator: SignedVisitorAuthenticator) {
        let other = SignedVisitorAuthenticator::new(vec![8_u8; MIN_SECRET_LEN]).expect("secret");
        let credential = other.issue(VisitorId::random());

        assert_eq!(
            authenticator.authenticate(&credential),
            Err(VisitorAuthError::Rejected)
        );
    }

    #[rstest]
    fn signature_is_bound_to_the_visitor(authenticator: SignedVisitorAuthenticator) {
        let issued = authenticator.issue(VisitorId::random());
        let (_, signature) = issued.split_once('.').expect("dot");
        let forged = format!("{}.{signature}", VisitorId::random());

        assert_eq!(
            authenticator.authenticate(&forged),
            Err(VisitorAuthError::Rejected)
        );
    }

    #[rstest]
    #[case("", VisitorAuthError::Missing)]
    #[case("   ", VisitorAuthError::Missing)]
    #[case("no-dot-here", VisitorAuthError::Malformed)]
    #[case("not-a-uuid.abcd", VisitorAuthError::Malformed)]
    #[case("6f1c0bb5-31a6-4a53-9c53-1c2a3b6e9f10.zz", VisitorAuthError::Malformed)]
    #[case("6f1c0bb5-31a6-4a53-9c53-1c2a3b6e9f10.abcd", VisitorAuthError::Rejected)]
    fn malformed_credentials_are_classified(
        authenticator: SignedVisitorAuthenticator,
        #[case] credential: &str,
        #[case] expected: VisitorAuthError,
    ) {
        assert_eq!(authenticator.authenticate(credential), Err(expected));
    }

    #[rstest]
    fn short_secrets_are_refused() {
        assert!(matches!(
            SignedVisitorAuthenticator::new(b"short".to_vec()),
            Err(CredentialSecretError::TooShort { length: 5, .. })
        ));
    }

    #[rstest]
    fn debug_output_hides_the_secret(authenticator: SignedVisitorAuthenticator) {
        assert!(!format!("{authenticator:?}").contains('7'));
    }
}
