//! Content negotiation and user-agent middleware

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};

use super::{RequestContext, RequestHandler, RequestMiddleware};
use crate::errors::ApiError;

/// The SDK's own user-agent token.
pub const SDK_USER_AGENT: &str = concat!("gpucloud-sdk-rust/", env!("CARGO_PKG_VERSION"));

/// `"<prefix> gpucloud-sdk-rust/<version>"`, or the bare SDK token without a
/// prefix.
#[must_use]
pub fn user_agent(prefix: Option<&str>) -> String {
    match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix} {SDK_USER_AGENT}"),
        None => SDK_USER_AGENT.to_string(),
    }
}

/// Sets `Accept: application/json`, and `Content-Type: application/json`
/// when the request has a body.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonContentTypeMiddleware;

impl RequestMiddleware for JsonContentTypeMiddleware {
    fn wrap(&self, next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(JsonContentTypeHandler { next })
    }
}

struct JsonContentTypeHandler {
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for JsonContentTypeHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let json = HeaderValue::from_static("application/json");
        if ctx.body.is_some() {
            ctx.headers.insert(CONTENT_TYPE, json.clone());
        }
        ctx.headers.insert(ACCEPT, json);
        self.next.handle(ctx).await
    }
}

/// Sets the `User-Agent` header.
#[derive(Debug, Clone)]
pub struct UserAgentMiddleware {
    value: HeaderValue,
}

impl UserAgentMiddleware {
    /// User agent with an optional caller prefix. A prefix that is not a
    /// valid header value is dropped.
    #[must_use]
    pub fn new(prefix: Option<&str>) -> Self {
        let value = HeaderValue::from_str(&user_agent(prefix))
            .unwrap_or_else(|_| HeaderValue::from_static(SDK_USER_AGENT));
        Self { value }
    }

    /// Header value sent with each request.
    #[must_use]
    pub fn value(&self) -> &HeaderValue {
        &self.value
    }
}

impl RequestMiddleware for UserAgentMiddleware {
    fn wrap(&self, next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(UserAgentHandler { value: self.value.clone(), next })
    }
}

struct UserAgentHandler {
    value: HeaderValue,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for UserAgentHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        ctx.headers.insert(USER_AGENT, self.value.clone());
        self.next.handle(ctx).await
    }
}
