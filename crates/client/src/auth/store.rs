//! Credential store with automatic refresh
//!
//! Owns the OAuth2 credential for one client:
//! - `client_credentials` and `refresh_token` grants against `/oauth2/token`
//! - JSON request bodies, falling back once to form encoding when the
//!   endpoint rejects the JSON shape
//! - Proactive refresh 30 seconds before expiry
//!
//! One `tokio::sync::RwLock` guards the credential. Grants hold the write
//! lock for their whole duration, so concurrent callers that find the token
//! stale queue behind a single grant and then reuse its result.

use std::fmt;

use chrono::{DateTime, Utc};
use gpucloud_common::ClassifiedError;
use reqwest::header::ACCEPT;
use reqwest::RequestBuilder;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{Credential, GrantType, TokenRequest, TokenResponse};

/// Lower-cased fragments of a 400 answer meaning "send this as a form".
const GRANT_REJECTION_PATTERNS: [&str; 2] = ["unsupported grant type", "not valid json"];

/// Error type for credential operations
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Token endpoint could not be reached
    #[error("token request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// Token endpoint answered with a non-2xx status
    #[error("token endpoint rejected the request: {0}")]
    Status(#[source] ClassifiedError),

    /// Token endpoint answered 2xx with an unexpected body
    #[error("malformed token response: {0}")]
    Decode(#[source] serde_json::Error),

    /// A grant failed; `source` is the JSON attempt's error
    #[error("{grant} grant failed: {source}")]
    Grant {
        /// Grant that was attempted
        grant: GrantType,
        /// Error from the JSON attempt
        #[source]
        source: Box<CredentialError>,
        /// Message from the form-encoded attempt, when one was made
        fallback: Option<String>,
    },

    /// No way to obtain a bearer token was configured
    #[error("no client credentials or bearer token configured")]
    NotConfigured,
}

impl CredentialError {
    /// Structured API error behind this error, if any.
    #[must_use]
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Status(err) => Some(err),
            Self::Grant { source, .. } => source.classified(),
            _ => None,
        }
    }

    /// `true` when the endpoint refused the JSON body shape itself.
    fn is_grant_rejection(&self) -> bool {
        let Self::Status(err) = self else {
            return false;
        };
        if err.status_code != 400 {
            return false;
        }
        let message = err.message.to_lowercase();
        (message.contains("grant_type") && message.contains("not specified"))
            || GRANT_REJECTION_PATTERNS.iter().any(|pattern| message.contains(pattern))
    }
}

/// Request body encoding for one token attempt.
#[derive(Debug, Clone, Copy)]
enum Encoding {
    Json,
    Form,
}

/// OAuth2 credential cache bound to one token endpoint
pub struct CredentialStore {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    static_token: Option<String>,
    credential: RwLock<Option<Credential>>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("static_token", &self.static_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Create an empty store for `token_url`.
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            static_token: None,
            credential: RwLock::new(None),
        }
    }

    /// Send `Authorization: Bearer <token>` on every token request, for
    /// gateways that authenticate the caller in front of the token endpoint.
    #[must_use]
    pub fn with_static_token(mut self, token: Option<String>) -> Self {
        self.static_token = token;
        self
    }

    /// Token endpoint this store talks to.
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Obtain a new credential with the `client_credentials` grant.
    ///
    /// # Errors
    /// Returns the JSON attempt's error, wrapped in
    /// [`CredentialError::Grant`], if no credential could be obtained. The
    /// cached credential is left untouched in that case.
    pub async fn acquire(&self) -> Result<(), CredentialError> {
        let mut slot = self.credential.write().await;
        self.acquire_locked(&mut slot).await.map(|_| ())
    }

    /// Renew the credential with the `refresh_token` grant.
    ///
    /// Falls back to [`Self::acquire`] when no credential or no refresh
    /// token is cached. The previous credential stays in place until the
    /// new one has been received.
    ///
    /// # Errors
    /// Same as [`Self::acquire`].
    pub async fn refresh(&self) -> Result<(), CredentialError> {
        let mut slot = self.credential.write().await;
        self.refresh_locked(&mut slot).await.map(|_| ())
    }

    /// Return a usable access token, refreshing it first when it is absent
    /// or within 30 seconds of expiry.
    ///
    /// # Errors
    /// Propagates grant failures from the refresh.
    pub async fn get_valid_token(&self) -> Result<String, CredentialError> {
        {
            let slot = self.credential.read().await;
            if let Some(credential) = slot.as_ref().filter(|c| !c.is_expired()) {
                return Ok(credential.access_token.clone());
            }
        }

        let mut slot = self.credential.write().await;
        if let Some(credential) = slot.as_ref().filter(|c| !c.is_expired()) {
            debug!("credential was renewed while waiting for the lock");
            return Ok(credential.access_token.clone());
        }
        self.refresh_locked(&mut slot).await
    }

    /// `true` if no credential is cached or it expires within 30 seconds.
    pub async fn is_expired(&self) -> bool {
        self.credential.read().await.as_ref().map_or(true, Credential::is_expired)
    }

    /// `Authorization` header value for the current token.
    ///
    /// # Errors
    /// Propagates failures from [`Self::get_valid_token`].
    pub async fn bearer_header(&self) -> Result<String, CredentialError> {
        let token = self.get_valid_token().await?;
        Ok(format!("Bearer {token}"))
    }

    /// Copy of the cached credential, for diagnostics.
    pub async fn credential_snapshot(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    /// Drop the cached credential.
    pub async fn clear(&self) {
        *self.credential.write().await = None;
    }

    /// Override the cached credential's expiry. Does nothing when no
    /// credential is cached. Intended for tests that need a stale token.
    pub async fn set_expires_at(&self, expires_at: DateTime<Utc>) {
        if let Some(credential) = self.credential.write().await.as_mut() {
            credential.expires_at = Some(expires_at);
        }
    }

    async fn acquire_locked(
        &self,
        slot: &mut Option<Credential>,
    ) -> Result<String, CredentialError> {
        let request = TokenRequest {
            grant_type: GrantType::ClientCredentials,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: None,
        };
        let credential = self.exchange(&request).await?;
        info!(
            expires_in = credential.expires_in,
            has_refresh_token = credential.refresh_token.is_some(),
            "acquired access token"
        );
        let token = credential.access_token.clone();
        *slot = Some(credential);
        Ok(token)
    }

    async fn refresh_locked(
        &self,
        slot: &mut Option<Credential>,
    ) -> Result<String, CredentialError> {
        let Some(refresh_token) = slot.as_ref().and_then(|c| c.refresh_token.clone()) else {
            debug!("no refresh token cached, acquiring a new credential");
            return self.acquire_locked(slot).await;
        };

        let request = TokenRequest {
            grant_type: GrantType::RefreshToken,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: Some(refresh_token.clone()),
        };
        let mut credential = self.exchange(&request).await?;
        if credential.refresh_token.is_none() {
            credential.refresh_token = Some(refresh_token);
        }
        info!(expires_in = credential.expires_in, "refreshed access token");
        let token = credential.access_token.clone();
        *slot = Some(credential);
        Ok(token)
    }

    /// Run one grant: JSON first, then form encoding if the endpoint
    /// rejected the JSON shape.
    async fn exchange(&self, request: &TokenRequest) -> Result<Credential, CredentialError> {
        let grant = request.grant_type;
        let json_err = match self.post(request, Encoding::Json).await {
            Ok(credential) => return Ok(credential),
            Err(err) => err,
        };

        if !json_err.is_grant_rejection() {
            return Err(CredentialError::Grant {
                grant,
                source: Box::new(json_err),
                fallback: None,
            });
        }

        warn!(
            %grant,
            error = %json_err,
            "token endpoint rejected JSON body, retrying form-encoded"
        );
        match self.post(request, Encoding::Form).await {
            Ok(credential) => Ok(credential),
            Err(form_err) => {
                warn!(%grant, error = %form_err, "form-encoded token request failed");
                Err(CredentialError::Grant {
                    grant,
                    source: Box::new(json_err),
                    fallback: Some(form_err.to_string()),
                })
            }
        }
    }

    async fn post(
        &self,
        request: &TokenRequest,
        encoding: Encoding,
    ) -> Result<Credential, CredentialError> {
        let builder = self.http.post(&self.token_url).header(ACCEPT, "application/json");
        let builder = match encoding {
            Encoding::Json => builder.json(request),
            Encoding::Form => builder.form(request),
        };
        let builder = self.with_gateway_auth(builder);

        debug!(grant = %request.grant_type, ?encoding, url = %self.token_url, "requesting token");
        let response = builder.send().await.map_err(CredentialError::Transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(CredentialError::Transport)?;

        if !status.is_success() {
            return Err(CredentialError::Status(ClassifiedError::from_response(
                status.as_u16(),
                &body,
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&body).map_err(CredentialError::Decode)?;
        Ok(Credential::from_response(token, Utc::now()))
    }

    fn with_gateway_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.static_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}
