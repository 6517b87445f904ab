use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dashboard_session::DEFAULT_EXPIRY_THRESHOLD_MINUTES;
use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REFRESH_LIFETIME: &str = "1d";
pub const DEFAULT_RENEWAL_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_SESSION_FILE: &str = ".dashboard-session.json";

pub const REFRESH_TOKEN_PATH: &str = "/refresh-token";
pub const LOGIN_PATH: &str = "/login";
pub const PROFILE_PATH: &str = "/profile";
/// Where the operator is sent once the session cannot be recovered.
pub const LOGIN_REDIRECT_PATH: &str = "/auth";

pub const ENV_API_BASE_URL: &str = "DASHBOARD_API_BASE_URL";
pub const ENV_API_TIMEOUT_MS: &str = "DASHBOARD_API_TIMEOUT_MS";
pub const ENV_REFRESH_LIFETIME: &str = "DASHBOARD_REFRESH_LIFETIME";
pub const ENV_RENEWAL_INTERVAL_SECONDS: &str = "DASHBOARD_RENEWAL_INTERVAL_SECONDS";
pub const ENV_RENEWAL_THRESHOLD_MINUTES: &str = "DASHBOARD_RENEWAL_THRESHOLD_MINUTES";
pub const ENV_SESSION_FILE: &str = "DASHBOARD_SESSION_FILE";

const MIN_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("base url must not be empty")]
    BaseUrlMissing,
    #[error("base url must use http:// or https:// and include a host: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid DASHBOARD_API_TIMEOUT_MS: {0}")]
    InvalidTimeoutMs(String),
    #[error("invalid DASHBOARD_RENEWAL_INTERVAL_SECONDS: {0}")]
    InvalidRenewalInterval(String),
    #[error("invalid DASHBOARD_RENEWAL_THRESHOLD_MINUTES: {0}")]
    InvalidRenewalThreshold(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub refresh_path: String,
    pub refresh_lifetime: String,
    pub login_path: String,
    pub profile_path: String,
    pub login_redirect_path: String,
    pub renewal_interval_seconds: u64,
    pub renewal_threshold_minutes: i64,
    pub session_file: PathBuf,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            refresh_path: REFRESH_TOKEN_PATH.to_string(),
            refresh_lifetime: DEFAULT_REFRESH_LIFETIME.to_string(),
            login_path: LOGIN_PATH.to_string(),
            profile_path: PROFILE_PATH.to_string(),
            login_redirect_path: LOGIN_REDIRECT_PATH.to_string(),
            renewal_interval_seconds: DEFAULT_RENEWAL_INTERVAL_SECONDS,
            renewal_threshold_minutes: DEFAULT_EXPIRY_THRESHOLD_MINUTES,
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let base_url = normalize_base_url(
            value(ENV_API_BASE_URL)
                .as_deref()
                .unwrap_or(DEFAULT_API_BASE_URL),
        )?;
        let timeout_ms = value(ENV_API_TIMEOUT_MS)
            .unwrap_or_else(|| DEFAULT_TIMEOUT_MS.to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidTimeoutMs(error.to_string()))?;
        let renewal_interval_seconds = value(ENV_RENEWAL_INTERVAL_SECONDS)
            .unwrap_or_else(|| DEFAULT_RENEWAL_INTERVAL_SECONDS.to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidRenewalInterval(error.to_string()))?;
        if renewal_interval_seconds == 0 {
            return Err(ConfigError::InvalidRenewalInterval(
                "must be at least 1".to_string(),
            ));
        }
        let renewal_threshold_minutes = value(ENV_RENEWAL_THRESHOLD_MINUTES)
            .unwrap_or_else(|| DEFAULT_EXPIRY_THRESHOLD_MINUTES.to_string())
            .parse::<i64>()
            .map_err(|error| ConfigError::InvalidRenewalThreshold(error.to_string()))?;
        if renewal_threshold_minutes < 0 {
            return Err(ConfigError::InvalidRenewalThreshold(
                "must not be negative".to_string(),
            ));
        }

        let mut config = Self::new(base_url);
        config.timeout_ms = timeout_ms;
        config.renewal_interval_seconds = renewal_interval_seconds;
        config.renewal_threshold_minutes = renewal_threshold_minutes;
        if let Some(lifetime) = value(ENV_REFRESH_LIFETIME) {
            config.refresh_lifetime = lifetime;
        }
        if let Some(path) = value(ENV_SESSION_FILE) {
            config.session_file = PathBuf::from(path);
        }
        Ok(config)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(MIN_TIMEOUT_MS))
    }

    #[must_use]
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_seconds.max(1))
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::BaseUrlMissing);
    }
    let Some((scheme, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidBaseUrl(trimmed.to_string()));
    };
    if !matches!(scheme, "http" | "https")
        || remainder.trim().is_empty()
        || remainder.starts_with('/')
    {
        return Err(ConfigError::InvalidBaseUrl(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}
