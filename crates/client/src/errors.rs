//! API-specific error types
//!
//! Every failure surfaced by the client is an [`ApiError`]. Variants keep
//! their underlying error in the `source()` chain so the retry classifier
//! can find structured status codes even when errors are wrapped.

use gpucloud_common::resilience::{should_retry, RetryFailure};
use gpucloud_common::ClassifiedError;
use thiserror::Error;

use crate::auth::CredentialError;

/// API operation errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx answer from the API, decoded from the error envelope
    #[error("{0}")]
    Api(#[source] ClassifiedError),

    /// Connection could not be established or was dropped
    #[error("connection error: {0}")]
    Connection(#[source] reqwest::Error),

    /// Request did not complete within the configured timeout
    #[error("request timeout: {0}")]
    Timeout(#[source] reqwest::Error),

    /// Any other HTTP transport failure
    #[error("HTTP transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Response body did not match the expected type
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    /// Request body could not be serialized
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// Request pipeline finished without producing a response
    #[error("request pipeline produced no response")]
    NoResponse,

    /// Bearer token could not be obtained
    #[error("credential negotiation failed: {0}")]
    Credential(#[from] CredentialError),

    /// Every attempt failed with a retryable error
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made, including the first
        attempts: u32,
        /// Error returned by the last attempt
        #[source]
        source: Box<ApiError>,
    },

    /// Caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// Client configuration is unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// A middleware rejected the request
    #[error("middleware error: {0}")]
    Middleware(String),
}

impl ApiError {
    /// Map a `reqwest` failure to the matching transport variant.
    ///
    /// The request URL is stripped so path and query text cannot leak into
    /// message-based retry classification.
    #[must_use]
    pub fn from_transport(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout(err)
        } else if err.is_connect() || err.is_request() {
            Self::Connection(err)
        } else {
            Self::Transport(err)
        }
    }

    /// Structured API error behind this error, if any.
    #[must_use]
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Api(err) => Some(err),
            Self::Credential(err) => err.classified(),
            Self::RetriesExhausted { source, .. } => source.classified(),
            _ => None,
        }
    }

    /// HTTP status code behind this error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.classified().map(|err| err.status_code)
    }

    /// Whether the retry policy would attempt this call again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        should_retry(self)
    }
}

impl RetryFailure for ApiError {
    fn exhausted(attempts: u32, last: Self) -> Self {
        Self::RetriesExhausted { attempts, source: Box::new(last) }
    }

    fn cancelled(_attempts: u32) -> Self {
        Self::Cancelled
    }
}
