//! Client configuration
//!
//! [`ClientConfig`] holds everything needed to construct a
//! [`GpuCloudClient`](crate::GpuCloudClient). It can be built in code or
//! loaded from environment variables and files through [`loader`].

pub mod loader;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ApiError;

pub use loader::{load, load_from_env, load_from_file, parse_config};

/// Default per-request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 500;

/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Connection and behavior settings for the API client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.example.com/v1`
    pub base_url: String,

    /// OAuth2 client id for the `client_credentials` grant
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth2 client secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Static bearer token, for gateways that authenticate the caller
    /// separately from the negotiated credential
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Prefix placed before the SDK's own user-agent token
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Per-request timeout in milliseconds; must be non-zero
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries beyond the first attempt; `0` disables the retry middleware
    #[serde(default)]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Register the logging middleware on both chains
    #[serde(default)]
    pub verbose: bool,
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

const fn default_retry_initial_delay_ms() -> u64 {
    DEFAULT_RETRY_INITIAL_DELAY_MS
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("user_agent", &self.user_agent)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_delay_ms", &self.retry_initial_delay_ms)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl ClientConfig {
    /// Configuration for `base_url` with default timeouts and no retries.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: None,
            client_secret: None,
            bearer_token: None,
            user_agent: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: 0,
            retry_initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            verbose: false,
        }
    }

    /// Set the OAuth2 client credentials.
    #[must_use]
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Set the static bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the user-agent prefix.
    #[must_use]
    pub fn with_user_agent(mut self, prefix: impl Into<String>) -> Self {
        self.user_agent = Some(prefix.into());
        self
    }

    /// Set the per-request timeout. Sub-millisecond remainders round up.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms = if Duration::from_millis(millis) < timeout {
            millis.saturating_add(1)
        } else {
            millis
        };
        self
    }

    /// Enable retries with the given budget and initial delay.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_initial_delay_ms = u64::try_from(initial_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Toggle verbose request logging.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    /// `true` when both client id and secret are configured.
    #[must_use]
    pub fn has_client_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    /// Check the configuration for values the client cannot work with.
    ///
    /// # Errors
    /// Returns `ApiError::Config` when the base URL is not an http(s) URL,
    /// the timeout is zero, `max_retries` exceeds [`MAX_RETRIES_LIMIT`],
    /// only one half of the client credentials is set, or no credential
    /// source is configured.
    pub fn validate(&self) -> Result<(), ApiError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            ApiError::Config(format!("base URL {:?} does not parse: {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "base URL must use http or https, got {}",
                url.scheme()
            )));
        }

        if self.timeout_ms == 0 {
            return Err(ApiError::Config("timeout must be greater than zero".to_string()));
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ApiError::Config(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.max_retries
            )));
        }

        if self.client_id.is_some() != self.client_secret.is_some() {
            return Err(ApiError::Config(
                "client_id and client_secret must be configured together".to_string(),
            ));
        }

        if !self.has_client_credentials() && self.bearer_token.is_none() {
            return Err(ApiError::Config(
                "either client credentials or a bearer token must be configured".to_string(),
            ));
        }

        Ok(())
    }
}
