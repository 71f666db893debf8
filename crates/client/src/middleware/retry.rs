//! Retry middleware
//!
//! Re-runs the rest of the request chain under a [`RetryPolicy`]. It never
//! resolves credentials itself; registered in front of the authentication
//! middleware, each attempt re-resolves the token through it.

use std::sync::Arc;

use async_trait::async_trait;
use gpucloud_common::resilience::RetryPolicy;
use gpucloud_common::ClassifiedError;

use super::{RequestContext, RequestHandler, RequestMiddleware};
use crate::errors::ApiError;

/// Wraps the remaining chain with a retry policy.
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    /// Retry with `policy`.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy applied to each request.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl RequestMiddleware for RetryMiddleware {
    fn wrap(&self, next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(RetryHandler { policy: self.policy.clone(), next })
    }
}

struct RetryHandler {
    policy: RetryPolicy,
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for RetryHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let cancellation = ctx.cancellation().cloned();
        let next = Arc::clone(&self.next);

        self.policy
            .execute(ctx, cancellation.as_ref(), move |ctx| {
                let next = Arc::clone(&next);
                Box::pin(async move {
                    ctx.clear_response();
                    next.handle(ctx).await?;
                    match ctx.response() {
                        Some(raw) if !raw.status.is_success() => Err(ApiError::Api(
                            ClassifiedError::from_response(raw.status.as_u16(), &raw.body),
                        )),
                        _ => Ok(()),
                    }
                })
            })
            .await
    }
}
