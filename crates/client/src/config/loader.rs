//! Configuration loader
//!
//! Loads client configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `GPUCLOUD_BASE_URL` is unset or a value is invalid, falls back to
//!    the file named by `GPUCLOUD_CONFIG`, or `gpucloud.toml` in the current
//!    working directory
//! 3. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `GPUCLOUD_BASE_URL`: API root (required)
//! - `GPUCLOUD_CLIENT_ID`: OAuth2 client id
//! - `GPUCLOUD_CLIENT_SECRET`: OAuth2 client secret
//! - `GPUCLOUD_BEARER_TOKEN`: Static bearer token
//! - `GPUCLOUD_USER_AGENT`: User-agent prefix
//! - `GPUCLOUD_TIMEOUT_MS`: Per-request timeout in milliseconds
//! - `GPUCLOUD_TIMEOUT_SECS`: Per-request timeout in seconds, used when
//!   `GPUCLOUD_TIMEOUT_MS` is unset
//! - `GPUCLOUD_MAX_RETRIES`: Retries beyond the first attempt
//! - `GPUCLOUD_RETRY_INITIAL_DELAY_MS`: Delay before the first retry
//! - `GPUCLOUD_VERBOSE`: Enable request logging (true/false)

use std::path::{Path, PathBuf};

use super::ClientConfig;
use crate::errors::ApiError;

type Result<T> = std::result::Result<T, ApiError>;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "GPUCLOUD_CONFIG";

/// File looked up in the working directory when no path is configured.
pub const DEFAULT_CONFIG_FILE: &str = "gpucloud.toml";

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If that fails, falls
/// back to loading from a config file. The result is validated.
///
/// # Errors
/// Returns `ApiError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The loaded configuration fails validation
pub fn load() -> Result<ClientConfig> {
    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            let path = std::env::var(CONFIG_PATH_ENV)
                .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
            load_from_file(&path)?
        }
    };
    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// `GPUCLOUD_BASE_URL` is required; everything else falls back to the
/// defaults of [`ClientConfig::new`].
///
/// # Errors
/// Returns `ApiError::Config` if the base URL is missing or a numeric
/// variable does not parse.
pub fn load_from_env() -> Result<ClientConfig> {
    load_from_lookup(|key| std::env::var(key).ok())
}

/// Build a configuration from an arbitrary variable source.
pub(crate) fn load_from_lookup<F>(lookup: F) -> Result<ClientConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let base_url = lookup("GPUCLOUD_BASE_URL").ok_or_else(|| {
        ApiError::Config("Missing required environment variable: GPUCLOUD_BASE_URL".to_string())
    })?;

    let mut config = ClientConfig::new(base_url);
    config.client_id = non_empty(lookup("GPUCLOUD_CLIENT_ID"));
    config.client_secret = non_empty(lookup("GPUCLOUD_CLIENT_SECRET"));
    config.bearer_token = non_empty(lookup("GPUCLOUD_BEARER_TOKEN"));
    config.user_agent = non_empty(lookup("GPUCLOUD_USER_AGENT"));

    if let Some(value) = lookup("GPUCLOUD_TIMEOUT_MS") {
        config.timeout_ms = parse_number(&value, "timeout")?;
    } else if let Some(value) = lookup("GPUCLOUD_TIMEOUT_SECS") {
        config.timeout_ms = parse_number::<u64>(&value, "timeout")?.saturating_mul(1000);
    }
    if let Some(value) = lookup("GPUCLOUD_MAX_RETRIES") {
        config.max_retries = parse_number(&value, "max retries")?;
    }
    if let Some(value) = lookup("GPUCLOUD_RETRY_INITIAL_DELAY_MS") {
        config.retry_initial_delay_ms = parse_number(&value, "retry initial delay")?;
    }
    config.verbose = lookup("GPUCLOUD_VERBOSE").is_some_and(|value| parse_bool(&value));

    Ok(config)
}

/// Load configuration from a file
///
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `ApiError::Config` if:
/// - File not found
/// - File format is invalid
/// - Required fields are missing
pub fn load_from_file(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        return Err(ApiError::Config(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| ApiError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`); files without
/// an extension are read as TOML.
///
/// # Errors
/// Returns `ApiError::Config` if format is invalid or parsing fails.
pub fn parse_config(contents: &str, path: &Path) -> Result<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ApiError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ApiError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(ApiError::Config(format!("Unsupported config format: {extension}"))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_number<T>(value: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ApiError::Config(format!("Invalid {what}: {e}")))
}

/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
