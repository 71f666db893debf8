//! OAuth 2.0 token types
//!
//! Wire shapes for the `/oauth2/token` endpoint and the cached credential
//! derived from them.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lead time before `expires_at` at which a credential is treated as expired.
pub const EXPIRY_SKEW_SECONDS: i64 = 30;

/// OAuth 2.0 grant types understood by the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Fresh token from the client id and secret
    ClientCredentials,
    /// New access token from a refresh token
    RefreshToken,
}

impl GrantType {
    /// Wire name of the grant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token request body, sent as JSON or as form fields.
#[derive(Clone, Serialize)]
pub struct TokenRequest {
    /// Requested grant
    pub grant_type: GrantType,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Present for the `refresh_token` grant only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// OAuth token response from the authorization server
///
/// Only `access_token` is mandatory; the endpoint omits the rest freely.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token
    pub access_token: String,
    /// Refresh token, when issued
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token type, `"Bearer"` when omitted
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: i64,
    /// Granted scopes (space-separated)
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Cached OAuth credential
///
/// `expires_at` is computed when the credential is stored. A credential
/// without `expires_at` is never considered valid.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token
    pub access_token: String,

    /// Refresh token, when issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type (normally "Bearer")
    pub token_type: String,

    /// Lifetime in seconds as reported by the server
    pub expires_in: i64,

    /// Absolute expiration timestamp (UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Granted scopes (space-separated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Credential {
    /// Build a credential from a token response received at `now`.
    ///
    /// `expires_in` comes from the server unchecked; lifetimes that do not
    /// fit a timestamp are clamped to the representable range.
    #[must_use]
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: Some(expiry_from(now, response.expires_in)),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            expires_in: response.expires_in,
            scope: response.scope,
        }
    }

    /// `true` if the credential expires within [`EXPIRY_SKEW_SECONDS`] of
    /// `now` (inclusive) or carries no expiry at all.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_SKEW_SECONDS) >= expires_at,
            None => true,
        }
    }

    /// [`Self::is_expired_at`] against the current time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Seconds until `expires_at`, if set.
    #[must_use]
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at.map(|expires_at| (expires_at - Utc::now()).num_seconds())
    }
}

/// `now + expires_in` seconds, saturating at the timestamp bounds.
fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(if expires_in > 0 {
            DateTime::<Utc>::MAX_UTC
        } else {
            DateTime::<Utc>::MIN_UTC
        })
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}
