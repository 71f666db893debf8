//! Error classification middleware
//!
//! Turns a non-2xx response into an [`ApiError::Api`] unless an earlier
//! layer already recorded an error.

use std::sync::Arc;

use async_trait::async_trait;
use gpucloud_common::ClassifiedError;

use super::{ResponseContext, ResponseHandler, ResponseMiddleware};
use crate::errors::ApiError;

/// Records a [`ClassifiedError`] for unsuccessful responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassificationMiddleware;

impl ResponseMiddleware for ErrorClassificationMiddleware {
    fn wrap(&self, next: Arc<dyn ResponseHandler>) -> Arc<dyn ResponseHandler> {
        Arc::new(ErrorClassificationHandler { next })
    }
}

struct ErrorClassificationHandler {
    next: Arc<dyn ResponseHandler>,
}

#[async_trait]
impl ResponseHandler for ErrorClassificationHandler {
    async fn handle(&self, ctx: &mut ResponseContext) -> Result<(), ApiError> {
        if !ctx.status.is_success() && ctx.error.is_none() {
            ctx.error =
                Some(ApiError::Api(ClassifiedError::from_response(ctx.status.as_u16(), &ctx.body)));
        }
        self.next.handle(ctx).await
    }
}
