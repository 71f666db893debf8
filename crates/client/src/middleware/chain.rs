//! Chain construction
//!
//! `[m1, m2, m3]` around terminal `h` builds `m1(m2(m3(h)))`.

use std::sync::Arc;

use super::{RequestHandler, RequestMiddleware, ResponseHandler, ResponseMiddleware};

/// Compose request middleware around `terminal`, first element outermost.
pub fn build_request_chain(
    middleware: &[Arc<dyn RequestMiddleware>],
    terminal: Arc<dyn RequestHandler>,
) -> Arc<dyn RequestHandler> {
    middleware.iter().rev().fold(terminal, |next, layer| layer.wrap(next))
}

/// Compose response middleware around `terminal`, first element outermost.
pub fn build_response_chain(
    middleware: &[Arc<dyn ResponseMiddleware>],
    terminal: Arc<dyn ResponseHandler>,
) -> Arc<dyn ResponseHandler> {
    middleware.iter().rev().fold(terminal, |next, layer| layer.wrap(next))
}
