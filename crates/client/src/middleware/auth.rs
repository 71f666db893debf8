//! Authentication middleware
//!
//! Sets `Authorization: Bearer <token>` from the client's credential store,
//! or from the static bearer token when no client credentials are set.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};

use super::{RequestContext, RequestHandler, RequestMiddleware};
use crate::auth::CredentialError;
use crate::errors::ApiError;

/// Injects the bearer token into every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthMiddleware;

impl RequestMiddleware for AuthMiddleware {
    fn wrap(&self, next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(AuthHandler { next })
    }
}

struct AuthHandler {
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for AuthHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let value = match ctx.credentials().cloned() {
            Some(store) => store.bearer_header().await?,
            None => match &ctx.config().bearer_token {
                Some(token) => format!("Bearer {token}"),
                None => return Err(CredentialError::NotConfigured.into()),
            },
        };

        let mut header = HeaderValue::from_str(&value).map_err(|e| {
            ApiError::Middleware(format!("bearer token cannot be sent as a header: {e}"))
        })?;
        header.set_sensitive(true);
        ctx.headers.insert(AUTHORIZATION, header);

        self.next.handle(ctx).await
    }
}
