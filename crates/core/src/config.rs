//! Client configuration.
//!
//! Values come from a config document (serde) or the process environment;
//! anything absent falls back to the development defaults below.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Base URL every API path is joined onto.
    pub api_base_url: String,

    /// Realtime broker endpoint (STOMP over WebSocket).
    pub realtime_url: String,

    pub login_path: String,
    pub refresh_path: String,
    pub register_path: String,
    pub profile_path: String,

    /// Client-side route of the login screen (redirect target on logout).
    pub login_route: String,

    /// Locale sent when the user never picked a language.
    pub default_locale: String,

    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Upper bound on a single refresh-token exchange.
    #[serde(with = "duration_secs")]
    pub refresh_timeout: Duration,

    /// Fixed delay between realtime reconnect attempts.
    #[serde(with = "duration_secs")]
    pub reconnect_delay: Duration,

    /// Consecutive failed connects before giving up (0 = retry forever).
    pub max_reconnect_attempts: u32,

    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Durable credential storage; `None` keeps credentials in memory only.
    pub storage_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            realtime_url: "ws://localhost:8080/ws".to_string(),
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            register_path: "/auth/register".to_string(),
            profile_path: "/auth/me".to_string(),
            login_route: "/login".to_string(),
            default_locale: "en".to_string(),
            request_timeout: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 0,
            heartbeat_interval: Duration::from_secs(30),
            storage_path: None,
        }
    }
}

impl ClientConfig {
    /// Build a config from `STOREFRONT_*` environment variables.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment, `.env` map, ...).
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("STOREFRONT_API_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = lookup("STOREFRONT_WS_URL") {
            config.realtime_url = url;
        }
        if let Some(locale) = lookup("STOREFRONT_LOCALE") {
            config.default_locale = locale;
        }
        if let Some(secs) = lookup("STOREFRONT_RECONNECT_DELAY_SECS") {
            config.reconnect_delay = Duration::from_secs(parse_number(
                "STOREFRONT_RECONNECT_DELAY_SECS",
                &secs,
            )?);
        }
        if let Some(max) = lookup("STOREFRONT_MAX_RECONNECT") {
            config.max_reconnect_attempts = parse_number("STOREFRONT_MAX_RECONNECT", &max)?;
        }
        if let Some(secs) = lookup("STOREFRONT_REFRESH_TIMEOUT_SECS") {
            config.refresh_timeout = Duration::from_secs(parse_number(
                "STOREFRONT_REFRESH_TIMEOUT_SECS",
                &secs,
            )?);
        }
        if let Some(path) = lookup("STOREFRONT_STORAGE_PATH") {
            config.storage_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(CoreError::config("api base url must not be empty"));
        }
        if !self.realtime_url.starts_with("ws://") && !self.realtime_url.starts_with("wss://") {
            return Err(CoreError::config(format!(
                "realtime url must use ws:// or wss:// (got {})",
                self.realtime_url
            )));
        }
        if self.reconnect_delay.is_zero() {
            return Err(CoreError::config("reconnect delay must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_number<T: core::str::FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::config(format!("{key} must be a whole number (got {value:?})")))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
