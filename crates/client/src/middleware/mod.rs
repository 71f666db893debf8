//! Request and response middleware
//!
//! A handler processes one context. A middleware takes the next handler and
//! returns a new handler wrapping it, so a list of middleware composes into a
//! single handler by folding from the innermost element outwards (see
//! [`chain`]). The first middleware in a list is the outermost layer: it sees
//! the context first and regains control last.
//!
//! The request chain ends in the network call, which stores the raw
//! response in the [`RequestContext`]. The response chain ends in a no-op and
//! operates on a [`ResponseContext`] built from that raw response.

pub mod auth;
pub mod chain;
pub mod classify;
pub mod headers;
pub mod logging;
pub mod registry;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::CredentialStore;
use crate::client::ClientShared;
use crate::config::ClientConfig;
use crate::errors::ApiError;

pub use auth::AuthMiddleware;
pub use chain::{build_request_chain, build_response_chain};
pub use classify::ErrorClassificationMiddleware;
pub use headers::{JsonContentTypeMiddleware, UserAgentMiddleware};
pub use logging::LoggingMiddleware;
pub use registry::{MiddlewareRegistry, MiddlewareSnapshot};
pub use retry::RetryMiddleware;

/// Raw HTTP response captured by the network step.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Full response body
    pub body: Vec<u8>,
}

/// Mutable state of one outgoing request.
pub struct RequestContext {
    /// HTTP method
    pub method: Method,
    /// Path relative to the client's base URL, e.g. `/instances/abc`
    pub path: String,
    /// Headers copied onto the outgoing request
    pub headers: HeaderMap,
    /// Query parameters in insertion order
    pub query: Vec<(String, String)>,
    /// JSON request body
    pub body: Option<Value>,
    /// Per-call timeout overriding the client default
    pub timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    shared: Arc<ClientShared>,
    response: Option<RawResponse>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("has_body", &self.body.is_some())
            .field("response_status", &self.response.as_ref().map(|r| r.status))
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    pub(crate) fn new(
        shared: Arc<ClientShared>,
        method: Method,
        path: impl Into<String>,
        body: Option<Value>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body,
            timeout: None,
            cancellation: None,
            shared,
            response: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    pub(crate) fn shared(&self) -> &ClientShared {
        &self.shared
    }

    /// Configuration of the client issuing this request.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Credential store of the client, when client credentials are set.
    #[must_use]
    pub fn credentials(&self) -> Option<&Arc<CredentialStore>> {
        self.shared.credentials.as_ref()
    }

    /// Caller's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// `true` once the caller has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Response stored by the network step.
    #[must_use]
    pub fn response(&self) -> Option<&RawResponse> {
        self.response.as_ref()
    }

    /// Store (or replace) the raw response.
    pub fn set_response(&mut self, response: RawResponse) {
        self.response = Some(response);
    }

    /// Forget any stored response, e.g. before re-running the chain.
    pub fn clear_response(&mut self) {
        self.response = None;
    }

    pub(crate) fn take_response(&mut self) -> Option<RawResponse> {
        self.response.take()
    }
}

/// Response seen by the response chain.
#[derive(Debug)]
pub struct ResponseContext {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Full response body
    pub body: Vec<u8>,
    /// Error to report to the caller; `None` means success
    pub error: Option<ApiError>,
    /// Request that produced this response
    pub request: RequestContext,
}

impl ResponseContext {
    pub(crate) fn new(request: RequestContext, raw: RawResponse, error: Option<ApiError>) -> Self {
        Self { status: raw.status, headers: raw.headers, body: raw.body, error, request }
    }
}

/// One step of the request pipeline.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Process the request, usually by mutating it and calling the next
    /// handler.
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError>;
}

/// One step of the response pipeline.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Inspect or annotate the response.
    async fn handle(&self, ctx: &mut ResponseContext) -> Result<(), ApiError>;
}

/// Wraps the remaining request pipeline.
pub trait RequestMiddleware: Send + Sync {
    /// Return a handler that runs this middleware around `next`.
    fn wrap(&self, next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler>;
}

/// Wraps the remaining response pipeline.
pub trait ResponseMiddleware: Send + Sync {
    /// Return a handler that runs this middleware around `next`.
    fn wrap(&self, next: Arc<dyn ResponseHandler>) -> Arc<dyn ResponseHandler>;
}
