//! Structured API errors
//!
//! Every non-2xx answer from the GPU cloud API is normalised into a
//! [`ClassifiedError`]. The API answers with a JSON envelope of the shape
//!
//! ```json
//! { "status_code": 404, "code": "instance_not_found", "message": "...", "details": {} }
//! ```
//!
//! but gateways and load balancers in front of it do not, so anything that does
//! not parse as the envelope falls back to the raw body text paired with the
//! HTTP status.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error returned by the API with a status code and optional machine-readable
/// code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// HTTP status code of the failed call
    pub status_code: u16,

    /// Machine-readable error code, when the API supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Human-readable message
    pub message: String,

    /// Free-form details attached by the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Wire shape of the JSON error envelope.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    code: Option<String>,
    message: String,
    #[serde(default)]
    details: Option<Value>,
}

impl ClassifiedError {
    /// Create an error with a status code and message.
    #[must_use]
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self { status_code, code: None, message: message.into(), details: None }
    }

    /// Attach a machine-readable error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Build an error from a raw HTTP response.
    ///
    /// Decodes the JSON error envelope when possible. Otherwise the trimmed
    /// body text becomes the message and `status` the status code. An envelope
    /// without a (non-zero) `status_code` inherits `status`.
    #[must_use]
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => Self {
                status_code: envelope.status_code.filter(|code| *code != 0).unwrap_or(status),
                code: envelope.code,
                message: envelope.message,
                details: envelope.details,
            },
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                let message = if text.is_empty() { format!("HTTP {status}") } else { text };
                Self::new(status, message)
            }
        }
    }

    /// `true` for 4xx statuses.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code)
    }

    /// `true` for 5xx statuses.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => {
                write!(f, "API error {} ({code}): {}", self.status_code, self.message)
            }
            None => write!(f, "API error {}: {}", self.status_code, self.message),
        }
    }
}

impl std::error::Error for ClassifiedError {}
