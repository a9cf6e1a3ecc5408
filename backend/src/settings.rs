//! Gateway configuration loaded via OrthoConfig.
//!
//! Every value can come from CLI flags, `VENUE_GATEWAY_*` environment
//! variables or a configuration file. Unset values fall back to the defaults
//! exposed by the accessors below, which also convert raw numbers into the
//! domain's configuration structs.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use url::Url;

use crate::domain::{
    AccessResolverConfig, ChatGatewayConfig, PresenceConfig, RetryPolicy,
    RotationSchedulerConfig, TokenEpochManagerConfig, TokenValueError, TokenWidth,
};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_TOKEN_WIDTH: u8 = 6;
const DEFAULT_GRACE_WINDOW_SECS: u64 = 300;
const DEFAULT_WRITER_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_DEBOUNCE_WINDOW_SECS: u64 = 30;
const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_STAY_WINDOW_SECS: u64 = 86_400;
const DEFAULT_OUTBOUND_CAPACITY: usize = 64;
const DEFAULT_ROTATION_RETRY_ATTEMPTS: u32 = 4;
const DEFAULT_ROTATION_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_CREDENTIAL_SECRET_FILE: &str = "/var/run/secrets/visitor_credential_secret";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000";

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The bind address does not parse.
    #[error("invalid bind address '{value}': {message}")]
    BindAddr {
        /// Raw value.
        value: String,
        /// Parser message.
        message: String,
    },
    /// The token width is outside the supported range.
    #[error("invalid token width: {0}")]
    TokenWidth(#[from] TokenValueError),
    /// The QR base URL does not parse.
    #[error("invalid QR base URL '{value}': {source}")]
    QrBase {
        /// Raw value.
        value: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// A duration does not fit the domain's time type.
    #[error("{name} is too large")]
    OutOfRange {
        /// Setting name.
        name: &'static str,
    },
}

/// Gateway settings.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "VENUE_GATEWAY")]
pub struct GatewaySettings {
    /// Socket address the HTTP server binds to.
    pub bind_addr: Option<String>,
    /// PostgreSQL URL; without it the gateway runs on in-memory adapters.
    pub database_url: Option<String>,
    /// Largest database pool size.
    pub db_max_connections: Option<u32>,
    /// Digits per access token.
    pub token_width: Option<u8>,
    /// Seconds the current code stays valid past expiry while rotation stalls.
    pub grace_window_secs: Option<u64>,
    /// Longest wait for a venue's rotation writer, in milliseconds.
    pub writer_timeout_ms: Option<u64>,
    /// Repeat scans inside this many seconds return the existing session.
    pub debounce_window_secs: Option<u64>,
    /// Sessions without a heartbeat for this long are closed as idle.
    pub idle_threshold_secs: Option<u64>,
    /// Seconds between presence sweeps.
    pub sweep_interval_secs: Option<u64>,
    /// Trailing window for the average stay, in seconds.
    pub stay_window_secs: Option<u64>,
    /// Deliveries buffered per chat connection before it counts as slow.
    pub outbound_capacity: Option<usize>,
    /// Attempts per rotation, including the first.
    pub rotation_retry_attempts: Option<u32>,
    /// Delay after the first failed rotation attempt, in milliseconds.
    pub rotation_retry_backoff_ms: Option<u64>,
    /// Comma-separated origins allowed to open chat sockets.
    pub allowed_origins: Option<String>,
    /// Public base of QR payload URLs.
    pub qr_base_url: Option<String>,
    /// File holding the visitor credential signing secret.
    pub credential_secret_file: Option<PathBuf>,
    /// File holding the cookie session key.
    pub session_key_file: Option<PathBuf>,
    /// Mark the session cookie `Secure`.
    pub session_cookie_secure: Option<bool>,
    /// `SameSite` policy for the session cookie: `Strict`, `Lax` or `None`.
    pub session_same_site: Option<String>,
    /// Allow a generated session key when the key file is missing.
    #[ortho_config(default = false)]
    pub session_allow_ephemeral: bool,
    /// JSON array of venues loaded at start-up.
    pub venues_file: Option<PathBuf>,
}

fn time_delta(name: &'static str, secs: u64) -> Result<TimeDelta, SettingsError> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or(SettingsError::OutOfRange { name })
}

impl GatewaySettings {
    /// Bind address, defaulting to `0.0.0.0:8080`.
    ///
    /// # Errors
    /// [`SettingsError::BindAddr`] when the value does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        let raw = self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
        raw.parse().map_err(|err: std::net::AddrParseError| SettingsError::BindAddr {
            value: raw.to_owned(),
            message: err.to_string(),
        })
    }

    /// Database URL when persistence is configured.
    #[must_use]
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Largest database pool size.
    #[must_use]
    pub fn db_max_connections(&self) -> u32 {
        self.db_max_connections.unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
    }

    /// Presence sweep cadence.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.sweep_interval_secs
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                .max(1),
        )
    }

    /// Origins allowed to open chat sockets, trimmed and lower-cased.
    #[must_use]
    pub fn allowed_origins(&self) -> Vec<String> {
        self.allowed_origins
            .as_deref()
            .unwrap_or(DEFAULT_ALLOWED_ORIGINS)
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_ascii_lowercase())
            .filter(|origin| !origin.is_empty())
            .collect()
    }

    /// Public QR base URL, if configured.
    ///
    /// # Errors
    /// [`SettingsError::QrBase`] when the value does not parse.
    pub fn qr_base_url(&self) -> Result<Option<Url>, SettingsError> {
        self.qr_base_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|source| SettingsError::QrBase {
                    value: raw.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    /// Path of the visitor credential secret.
    #[must_use]
    pub fn credential_secret_file(&self) -> &Path {
        self.credential_secret_file
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_CREDENTIAL_SECRET_FILE))
    }

    /// Optional venues seed file.
    #[must_use]
    pub fn venues_file(&self) -> Option<&Path> {
        self.venues_file.as_deref()
    }

    /// Epoch manager configuration.
    ///
    /// # Errors
    /// [`SettingsError::TokenWidth`] for unsupported widths.
    pub fn epoch_manager(&self) -> Result<TokenEpochManagerConfig, SettingsError> {
        let defaults = TokenEpochManagerConfig::default();
        Ok(TokenEpochManagerConfig {
            token_width: TokenWidth::new(self.token_width.unwrap_or(DEFAULT_TOKEN_WIDTH))?,
            writer_timeout: Duration::from_millis(
                self.writer_timeout_ms.unwrap_or(DEFAULT_WRITER_TIMEOUT_MS),
            ),
            retry: RetryPolicy {
                max_attempts: self
                    .rotation_retry_attempts
                    .unwrap_or(DEFAULT_ROTATION_RETRY_ATTEMPTS),
                initial_backoff: Duration::from_millis(
                    self.rotation_retry_backoff_ms
                        .unwrap_or(DEFAULT_ROTATION_RETRY_BACKOFF_MS),
                ),
                ..defaults.retry
            },
            ..defaults
        })
    }

    /// Rotation scheduler configuration.
    #[must_use]
    pub fn scheduler(&self) -> RotationSchedulerConfig {
        RotationSchedulerConfig::default()
    }

    /// Access resolver configuration.
    ///
    /// # Errors
    /// [`SettingsError::OutOfRange`] when the grace window overflows.
    pub fn access(&self) -> Result<AccessResolverConfig, SettingsError> {
        Ok(AccessResolverConfig {
            grace_window: time_delta(
                "grace_window_secs",
                self.grace_window_secs.unwrap_or(DEFAULT_GRACE_WINDOW_SECS),
            )?,
        })
    }

    /// Presence configuration.
    ///
    /// # Errors
    /// [`SettingsError::OutOfRange`] when a window overflows.
    pub fn presence(&self) -> Result<PresenceConfig, SettingsError> {
        Ok(PresenceConfig {
            idle_threshold: time_delta(
                "idle_threshold_secs",
                self.idle_threshold_secs
                    .unwrap_or(DEFAULT_IDLE_THRESHOLD_SECS),
            )?,
            debounce_window: time_delta(
                "debounce_window_secs",
                self.debounce_window_secs
                    .unwrap_or(DEFAULT_DEBOUNCE_WINDOW_SECS),
            )?,
            stay_window: time_delta(
                "stay_window_secs",
                self.stay_window_secs.unwrap_or(DEFAULT_STAY_WINDOW_SECS),
            )?,
        })
    }

    /// Chat gateway configuration.
    #[must_use]
    pub fn chat(&self) -> ChatGatewayConfig {
        ChatGatewayConfig {
            outbound_capacity: self
                .outbound_capacity
                .unwrap_or(DEFAULT_OUTBOUND_CAPACITY)
                .max(1),
            ..ChatGatewayConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for gateway configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 8] = [
        "VENUE_GATEWAY_BIND_ADDR",
        "VENUE_GATEWAY_DATABASE_URL",
        "VENUE_GATEWAY_TOKEN_WIDTH",
        "VENUE_GATEWAY_GRACE_WINDOW_SECS",
        "VENUE_GATEWAY_IDLE_THRESHOLD_SECS",
        "VENUE_GATEWAY_ALLOWED_ORIGINS",
        "VENUE_GATEWAY_QR_BASE_URL",
        "VENUE_GATEWAY_OUTBOUND_CAPACITY",
    ];

    fn load_from_empty_args() -> GatewaySettings {
        GatewaySettings::load_from_iter([OsString::from("venue-gateway")])
            .expect("config should load")
    }

    #[rstest]
    fn defaults_apply_when_unset() {
        let _guard = lock_env(VARS.map(|name| (name, None::<String>)));

        let settings = load_from_empty_args();

        assert_eq!(
            settings.bind_addr().expect("default addr"),
            "0.0.0.0:8080".parse::<SocketAddr>().expect("addr")
        );
        assert!(settings.database_url().is_none());
        assert_eq!(
            settings.epoch_manager().expect("epochs"),
            TokenEpochManagerConfig::default()
        );
        assert_eq!(settings.access().expect("access"), AccessResolverConfig::default());
        assert_eq!(settings.presence().expect("presence"), PresenceConfig::default());
        assert_eq!(settings.chat(), ChatGatewayConfig::default());
        assert_eq!(settings.allowed_origins(), vec!["http://localhost:3000"]);
        assert!(settings.qr_base_url().expect("qr").is_none());
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            ("VENUE_GATEWAY_BIND_ADDR", Some("127.0.0.1:9090".to_owned())),
            (
                "VENUE_GATEWAY_DATABASE_URL",
                Some("postgres://gateway@db/gateway".to_owned()),
            ),
            ("VENUE_GATEWAY_TOKEN_WIDTH", Some("8".to_owned())),
            ("VENUE_GATEWAY_GRACE_WINDOW_SECS", Some("120".to_owned())),
            ("VENUE_GATEWAY_IDLE_THRESHOLD_SECS", Some("900".to_owned())),
            (
                "VENUE_GATEWAY_ALLOWED_ORIGINS",
                Some("https://Bar.example/, https://tv.example".to_owned()),
            ),
            (
                "VENUE_GATEWAY_QR_BASE_URL",
                Some("https://gate.example/".to_owned()),
            ),
            ("VENUE_GATEWAY_OUTBOUND_CAPACITY", Some("8".to_owned())),
        ]);

        let settings = load_from_empty_args();

        assert_eq!(
            settings.bind_addr().expect("addr").to_string(),
            "127.0.0.1:9090"
        );
        assert_eq!(
            settings.database_url(),
            Some("postgres://gateway@db/gateway")
        );
        assert_eq!(
            settings.epoch_manager().expect("epochs").token_width.get(),
            8
        );
        assert_eq!(
            settings.access().expect("access").grace_window,
            TimeDelta::minutes(2)
        );
        assert_eq!(
            settings.presence().expect("presence").idle_threshold,
            TimeDelta::minutes(15)
        );
        assert_eq!(
            settings.allowed_origins(),
            vec!["https://bar.example", "https://tv.example"]
        );
        assert_eq!(settings.chat().outbound_capacity, 8);
        assert_eq!(
            settings.qr_base_url().expect("qr").map(String::from),
            Some("https://gate.example/".to_owned())
        );
    }

    #[rstest]
    #[case(GatewaySettings { token_width: Some(2), ..GatewaySettings::default() })]
    #[case(GatewaySettings { token_width: Some(13), ..GatewaySettings::default() })]
    fn unsupported_token_widths_are_rejected(#[case] settings: GatewaySettings) {
        assert!(matches!(
            settings.epoch_manager(),
            Err(SettingsError::TokenWidth(_))
        ));
    }

    #[rstest]
    fn malformed_values_are_reported() {
        let settings = GatewaySettings {
            bind_addr: Some("port eighty".to_owned()),
            qr_base_url: Some("not a url".to_owned()),
            grace_window_secs: Some(u64::MAX),
            ..GatewaySettings::default()
        };

        assert!(matches!(
            settings.bind_addr(),
            Err(SettingsError::BindAddr { .. })
        ));
        assert!(matches!(
            settings.qr_base_url(),
            Err(SettingsError::QrBase { .. })
        ));
        assert!(matches!(
            settings.access(),
            Err(SettingsError::OutOfRange { .. })
        ));
    }
}
