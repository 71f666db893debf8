//! Middleware registry
//!
//! Holds the request and response middleware lists of one client. Lists may
//! be changed while requests are in flight; every request works from a
//! [`MiddlewareSnapshot`] taken once at dispatch, so later changes never
//! affect it.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{RequestMiddleware, ResponseMiddleware};

#[derive(Default, Clone)]
struct Lists {
    request: Vec<Arc<dyn RequestMiddleware>>,
    response: Vec<Arc<dyn ResponseMiddleware>>,
}

/// Ordered, mutable middleware lists guarded by one lock
#[derive(Default)]
pub struct MiddlewareRegistry {
    lists: RwLock<Lists>,
}

/// Independent copy of the registry's lists at one point in time
#[derive(Clone, Default)]
pub struct MiddlewareSnapshot {
    /// Request middleware, outermost first
    pub request: Vec<Arc<dyn RequestMiddleware>>,
    /// Response middleware, outermost first
    pub response: Vec<Arc<dyn ResponseMiddleware>>,
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lists = self.lists.read();
        f.debug_struct("MiddlewareRegistry")
            .field("request", &lists.request.len())
            .field("response", &lists.response.len())
            .finish()
    }
}

impl std::fmt::Debug for MiddlewareSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareSnapshot")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .finish()
    }
}

impl MiddlewareRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request middleware (innermost so far).
    pub fn add_request(&self, middleware: Arc<dyn RequestMiddleware>) {
        self.lists.write().request.push(middleware);
    }

    /// Append a response middleware (innermost so far).
    pub fn add_response(&self, middleware: Arc<dyn ResponseMiddleware>) {
        self.lists.write().response.push(middleware);
    }

    /// Replace the request list.
    pub fn set_request(&self, middleware: Vec<Arc<dyn RequestMiddleware>>) {
        self.lists.write().request = middleware;
    }

    /// Replace the response list.
    pub fn set_response(&self, middleware: Vec<Arc<dyn ResponseMiddleware>>) {
        self.lists.write().response = middleware;
    }

    /// Remove all request middleware.
    pub fn clear_request(&self) {
        self.lists.write().request.clear();
    }

    /// Remove all response middleware.
    pub fn clear_response(&self) {
        self.lists.write().response.clear();
    }

    /// Remove everything.
    pub fn clear(&self) {
        let mut lists = self.lists.write();
        lists.request.clear();
        lists.response.clear();
    }

    /// Number of request middleware.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.lists.read().request.len()
    }

    /// Number of response middleware.
    #[must_use]
    pub fn response_count(&self) -> usize {
        self.lists.read().response.len()
    }

    /// Copy both lists under one read lock.
    #[must_use]
    pub fn snapshot(&self) -> MiddlewareSnapshot {
        let lists = self.lists.read().clone();
        MiddlewareSnapshot { request: lists.request, response: lists.response }
    }
}
