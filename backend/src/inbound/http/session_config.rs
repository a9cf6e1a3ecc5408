//! Cookie session configuration.
//!
//! The session cookie only remembers which visitor session a browser opened,
//! but it is still signed and encrypted, so release builds insist on an
//! explicit key file and sane cookie flags. Debug builds fall back to
//! defaults with a warning.

use std::path::{Path, PathBuf};

use actix_web::cookie::{Key, SameSite};
use tracing::warn;
use zeroize::Zeroize;

use crate::settings::GatewaySettings;

const SESSION_KEY_DEFAULT_PATH: &str = "/var/run/secrets/session_key";
const SESSION_KEY_MIN_LEN: usize = 64;
const SAMESITE_EXPECTED: &str = "Strict|Lax|None";

/// Build mode for session configuration validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildMode {
    /// Defaults are tolerated with a warning.
    Debug,
    /// Every toggle must be explicit and valid.
    Release,
}

impl BuildMode {
    /// Determine the build mode from `cfg!(debug_assertions)`.
    #[must_use]
    pub fn from_debug_assertions() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Release
        }
    }

    fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }
}

/// Validated cookie session settings.
pub struct SessionSettings {
    /// Signing and encryption key.
    pub key: Key,
    /// Whether the cookie is marked `Secure`.
    pub cookie_secure: bool,
    /// `SameSite` policy.
    pub same_site: SameSite,
}

/// Errors raised while validating session configuration.
#[derive(thiserror::Error, Debug)]
pub enum SessionConfigError {
    /// A setting required in release builds is unset.
    #[error("missing required setting: {name}")]
    Missing {
        /// Setting name.
        name: &'static str,
    },
    /// A setting holds an unsupported value.
    #[error("invalid value for {name}='{value}'; expected {expected}")]
    Invalid {
        /// Setting name.
        name: &'static str,
        /// Raw value.
        value: String,
        /// Accepted values.
        expected: &'static str,
    },
    /// The key file could not be read.
    #[error("failed to read session key at {path}: {source}")]
    KeyRead {
        /// Key path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The key file is too short.
    #[error("session key at {path} too short: need >= {min_len} bytes, got {length}")]
    KeyTooShort {
        /// Key path.
        path: PathBuf,
        /// Bytes read.
        length: usize,
        /// Bytes required.
        min_len: usize,
    },
    /// `SameSite=None` without a secure cookie.
    #[error("session_same_site=None requires session_cookie_secure=true")]
    InsecureSameSiteNone,
    /// Ephemeral keys are refused in release builds.
    #[error("session_allow_ephemeral must be false in release builds")]
    EphemeralNotAllowed,
}

/// Validate the session settings for `mode`.
///
/// # Errors
/// Returns [`SessionConfigError`] when a release build lacks an explicit,
/// valid setting or the key file is unusable.
pub fn session_settings(
    settings: &GatewaySettings,
    mode: BuildMode,
) -> Result<SessionSettings, SessionConfigError> {
    if settings.session_allow_ephemeral && !mode.is_debug() {
        return Err(SessionConfigError::EphemeralNotAllowed);
    }
    let cookie_secure = match settings.session_cookie_secure {
        Some(flag) => flag,
        None if mode.is_debug() => {
            warn!("session_cookie_secure not set; defaulting to secure");
            true
        }
        None => {
            return Err(SessionConfigError::Missing {
                name: "session_cookie_secure",
            });
        }
    };
    let same_site = same_site(settings.session_same_site.as_deref(), mode, cookie_secure)?;
    let path = settings
        .session_key_file
        .as_deref()
        .unwrap_or_else(|| Path::new(SESSION_KEY_DEFAULT_PATH));
    let key = session_key(path, mode, settings.session_allow_ephemeral)?;
    Ok(SessionSettings {
        key,
        cookie_secure,
        same_site,
    })
}

fn same_site(
    raw: Option<&str>,
    mode: BuildMode,
    cookie_secure: bool,
) -> Result<SameSite, SessionConfigError> {
    let fallback = if mode.is_debug() {
        SameSite::Lax
    } else {
        SameSite::Strict
    };
    let Some(value) = raw else {
        if mode.is_debug() {
            return Ok(fallback);
        }
        return Err(SessionConfigError::Missing {
            name: "session_same_site",
        });
    };
    match value.to_ascii_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" if cookie_secure => Ok(SameSite::None),
        "none" if mode.is_debug() => {
            warn!("session_same_site=None on an insecure cookie; browsers may drop it");
            Ok(SameSite::None)
        }
        "none" => Err(SessionConfigError::InsecureSameSiteNone),
        _ if mode.is_debug() => {
            warn!(%value, "invalid session_same_site; using default");
            Ok(fallback)
        }
        _ => Err(SessionConfigError::Invalid {
            name: "session_same_site",
            value: value.to_owned(),
            expected: SAMESITE_EXPECTED,
        }),
    }
}

fn session_key(path: &Path, mode: BuildMode, allow_ephemeral: bool) -> Result<Key, SessionConfigError> {
    match std::fs::read(path) {
        Ok(mut bytes) => {
            let length = bytes.len();
            if mode == BuildMode::Release && length < SESSION_KEY_MIN_LEN {
                bytes.zeroize();
                return Err(SessionConfigError::KeyTooShort {
                    path: path.to_path_buf(),
                    length,
                    min_len: SESSION_KEY_MIN_LEN,
                });
            }
            let key = Key::derive_from(&bytes);
            bytes.zeroize();
            Ok(key)
        }
        Err(error) if mode.is_debug() || allow_ephemeral => {
            warn!(path = %path.display(), %error, "using temporary session key (dev only)");
            Ok(Key::generate())
        }
        Err(source) => Err(SessionConfigError::KeyRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}
