//! Request/response logging middleware
//!
//! Emits `tracing` debug events. Header values are never logged, so bearer
//! tokens stay out of the logs.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::{
    RequestContext, RequestHandler, RequestMiddleware, ResponseContext, ResponseHandler,
    ResponseMiddleware,
};
use crate::errors::ApiError;

/// Logs requests and responses at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl RequestMiddleware for LoggingMiddleware {
    fn wrap(&self, next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(RequestLogger { next })
    }
}

impl ResponseMiddleware for LoggingMiddleware {
    fn wrap(&self, next: Arc<dyn ResponseHandler>) -> Arc<dyn ResponseHandler> {
        Arc::new(ResponseLogger { next })
    }
}

struct RequestLogger {
    next: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for RequestLogger {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let started = Instant::now();
        debug!(
            method = %ctx.method,
            path = %ctx.path,
            query_params = ctx.query.len(),
            has_body = ctx.body.is_some(),
            "sending request"
        );

        let result = self.next.handle(ctx).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match (&result, ctx.response()) {
            (Err(error), _) => {
                debug!(
                    method = %ctx.method,
                    path = %ctx.path,
                    elapsed_ms,
                    error = %error,
                    "request failed"
                );
            }
            (Ok(()), Some(response)) => {
                debug!(
                    method = %ctx.method,
                    path = %ctx.path,
                    status = response.status.as_u16(),
                    bytes = response.body.len(),
                    elapsed_ms,
                    "request completed"
                );
            }
            (Ok(()), None) => {
                debug!(
                    method = %ctx.method,
                    path = %ctx.path,
                    elapsed_ms,
                    "request produced no response"
                );
            }
        }
        result
    }
}

struct ResponseLogger {
    next: Arc<dyn ResponseHandler>,
}

#[async_trait]
impl ResponseHandler for ResponseLogger {
    async fn handle(&self, ctx: &mut ResponseContext) -> Result<(), ApiError> {
        debug!(
            method = %ctx.request.method,
            path = %ctx.request.path,
            status = ctx.status.as_u16(),
            error = ctx.error.as_ref().map(tracing::field::display),
            "response received"
        );
        self.next.handle(ctx).await
    }
}
