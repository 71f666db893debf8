//! Resilience patterns for transient API failures
//!
//! This module provides:
//! - **Classification**: decides whether a failure is transient (worth
//!   retrying) or permanent, from structured API errors, wrapped errors and
//!   free-text messages alike
//! - **Retry Policy**: bounded retries with exponential backoff, a 30 second
//!   ceiling and +/-50% jitter, with cancellable backoff sleeps
//!
//! The retry executor never inspects what the retried step does. Callers wrap
//! the whole step that should be repeated (for API calls this includes
//! resolving the bearer token) and the executor simply invokes it again.
//!
//! ## Known fragility
//!
//! Errors without a status code are classified by matching lower-cased
//! message substrings. This breaks silently if upstream messages are reworded;
//! a closed set of wire error codes would replace it if the API ever
//! standardises one.

pub mod classify;
#[cfg(feature = "runtime")]
pub mod retry;

pub use classify::{classify_message, is_retryable_status, should_retry};
#[cfg(feature = "runtime")]
pub use retry::{
    RetryFailure, RetryObserver, RetryPolicy, TracingObserver, JITTER_PERCENT, MAX_DELAY,
};
