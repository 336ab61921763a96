//! Client configuration: environment, credentials, timeouts, retry budget.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EtradeError;

/// Environment variable holding the consumer key.
pub const ENV_CONSUMER_KEY: &str = "ETRADE_CONSUMER_KEY";
/// Environment variable holding the consumer secret.
pub const ENV_CONSUMER_SECRET: &str = "ETRADE_CONSUMER_SECRET";

/// Environment for the E*Trade API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Sandbox (simulated data, separate token namespace).
    Sandbox,
    /// Production (real accounts).
    Production,
}

impl Environment {
    /// Base URL for this environment.
    #[must_use]
    pub const fn base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://apisb.etrade.com",
            Self::Production => "https://api.etrade.com",
        }
    }

    /// Lowercase identifier used in file names and events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }

    /// Check if this is production.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandbox => write!(f, "SANDBOX"),
            Self::Production => write!(f, "PRODUCTION"),
        }
    }
}

/// Retry budget for the transport collaborator.
///
/// Applies to signed domain calls only; the OAuth handshake endpoints are
/// single-attempt.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per call.
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Consumer credentials as read from a JSON config file.
#[derive(Debug, Deserialize)]
struct FileCredentials {
    consumer_key: String,
    consumer_secret: String,
}

/// E*Trade API configuration.
///
/// Credentials are supplied at construction and never persisted; only the
/// derived access token reaches the token store.
#[derive(Debug, Clone)]
pub struct EtradeConfig {
    /// OAuth consumer key.
    pub consumer_key: String,
    /// OAuth consumer secret.
    pub consumer_secret: String,
    /// API environment.
    pub environment: Environment,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Retry budget for signed domain calls.
    pub retry: RetryConfig,
    /// Base URL override, for tests and proxies. Takes precedence over the
    /// environment URL when set.
    pub base_url_override: Option<String>,
}

impl EtradeConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            environment,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            base_url_override: None,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the base URL (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    /// Base URL for this configuration.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
    }

    /// OAuth endpoint base URL.
    #[must_use]
    pub fn oauth_base_url(&self) -> String {
        format!("{}/oauth", self.base_url())
    }

    /// Domain API v1 base URL.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        format!("{}/v1", self.base_url())
    }

    /// User-facing authorization URL for a request token.
    #[must_use]
    pub fn authorize_url(&self, request_token: &str) -> String {
        format!(
            "{}/e/t/etws/authorize?key={}&token={}",
            self.base_url(),
            self.consumer_key,
            request_token
        )
    }

    /// Create a configuration from `ETRADE_CONSUMER_KEY` and
    /// `ETRADE_CONSUMER_SECRET`.
    pub fn from_env(environment: Environment) -> Result<Self, EtradeError> {
        Self::from_vars(
            std::env::var(ENV_CONSUMER_KEY).ok(),
            std::env::var(ENV_CONSUMER_SECRET).ok(),
            environment,
        )
    }

    /// Load a configuration from a JSON file with `consumer_key` and
    /// `consumer_secret` fields. Defaults to
    /// `$XDG_CONFIG_HOME/etrade-client/config.json`.
    pub fn from_file(path: Option<PathBuf>, environment: Environment) -> Result<Self, EtradeError> {
        let path = path.unwrap_or_else(default_config_path);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            EtradeError::validation("config_file", format!("{}: {e}", path.display()))
        })?;
        let creds: FileCredentials = serde_json::from_str(&raw).map_err(|e| {
            EtradeError::validation("config_file", format!("{}: {e}", path.display()))
        })?;
        Ok(Self::new(creds.consumer_key, creds.consumer_secret, environment))
    }

    /// Load from environment variables, falling back to the config file.
    pub fn load(environment: Environment) -> Result<Self, EtradeError> {
        Self::from_env(environment).or_else(|_| Self::from_file(None, environment))
    }

    fn from_vars(
        key: Option<String>,
        secret: Option<String>,
        environment: Environment,
    ) -> Result<Self, EtradeError> {
        let consumer_key = key.filter(|k| !k.is_empty()).ok_or_else(|| {
            EtradeError::validation(ENV_CONSUMER_KEY, "missing or empty")
        })?;
        let consumer_secret = secret.filter(|s| !s.is_empty()).ok_or_else(|| {
            EtradeError::validation(ENV_CONSUMER_SECRET, "missing or empty")
        })?;
        Ok(Self::new(consumer_key, consumer_secret, environment))
    }
}

/// XDG-compliant config file location.
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("etrade-client")
        .join("config.json")
}
