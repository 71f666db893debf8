//! Retry policy with exponential backoff and jitter
//!
//! Attempt 0 runs immediately. Before attempt `i >= 1` the executor sleeps
//! `initial_delay * 2^(i-1)`, capped at [`MAX_DELAY`], scaled by a random
//! factor in `[1 - JITTER, 1 + JITTER]` where `JITTER` is [`JITTER_PERCENT`]
//! percent. It stops on success, on the first error [`should_retry`] rejects,
//! or once `max_retries` extra attempts have failed.
//!
//! Jitter is drawn from `rand::thread_rng()`; each thread owns its generator.
//!
//! Backoff sleeps race the caller's [`CancellationToken`]; cancellation is
//! also checked before every attempt.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::classify::should_retry;

/// Ceiling applied to the exponential delay before jitter.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Jitter amplitude, in percent of the capped delay.
pub const JITTER_PERCENT: u32 = 50;

/// Maximum exponent for the exponential calculation to prevent overflow
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Error types the retry executor can produce on its own.
///
/// Non-retryable errors are handed back untouched; only exhaustion and
/// cancellation need to be expressed in the caller's error type.
pub trait RetryFailure: Error + Send + Sized + 'static {
    /// Wrap the last error after `attempts` failed attempts.
    fn exhausted(attempts: u32, last: Self) -> Self;

    /// The caller cancelled after `attempts` attempts had run.
    fn cancelled(attempts: u32) -> Self;
}

/// Diagnostic sink notified about retry decisions.
pub trait RetryObserver: Send + Sync {
    /// A retry has been scheduled: `attempt` is the upcoming attempt number
    /// (1-based count of retries) and `delay` the jittered backoff.
    fn on_retry(&self, attempt: u32, delay: Duration, error: &(dyn Error + 'static));

    /// All attempts failed; `attempts` counts every invocation.
    fn on_exhausted(&self, attempts: u32, error: &(dyn Error + 'static));
}

/// Observer emitting `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_retry(&self, attempt: u32, delay: Duration, error: &(dyn Error + 'static)) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        warn!(attempt, delay_ms, error = %error, "retrying request");
    }

    fn on_exhausted(&self, attempts: u32, error: &(dyn Error + 'static)) {
        warn!(attempts, error = %error, "all retry attempts failed");
    }
}

/// Bounded retry policy.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    observer: Arc<dyn RetryObserver>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a policy with `max_retries` additional attempts beyond the
    /// first, reporting through [`TracingObserver`].
    #[must_use]
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self { max_retries, initial_delay, observer: Arc::new(TracingObserver) }
    }

    /// Replace the diagnostic sink.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Additional attempts beyond the first.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Base delay before the first retry.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Capped exponential delay before `attempt` (1-based), without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
        self.initial_delay.saturating_mul(2_u32.saturating_pow(exponent)).min(MAX_DELAY)
    }

    /// Jittered delay before `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() {
            return base;
        }
        let spread = f64::from(JITTER_PERCENT) / 100.0;
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        base.mul_f64(factor)
    }

    /// Run `operation` against `state` until it succeeds, fails permanently
    /// or runs out of attempts.
    ///
    /// The operation receives the state mutably on every attempt, so a
    /// request context can be re-run through the same pipeline. Permanent
    /// errors are returned unmodified; exhaustion and cancellation are
    /// reported through [`RetryFailure`].
    pub async fn execute<S, T, E, F>(
        &self,
        state: &mut S,
        cancellation: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, E>
    where
        S: Send + ?Sized,
        T: Send,
        E: RetryFailure,
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T, E>> + Send,
    {
        let mut attempt: u32 = 0;

        loop {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                debug!(attempts = attempt, "retry loop cancelled before attempt");
                return Err(E::cancelled(attempt));
            }

            let error = match operation(state).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let performed = attempt + 1;
            if !should_retry(&error) {
                debug!(attempts = performed, error = %error, "error is not retryable");
                return Err(error);
            }
            if attempt >= self.max_retries {
                self.observer.on_exhausted(performed, &error);
                return Err(E::exhausted(performed, error));
            }

            attempt += 1;
            let delay = self.delay_for(attempt);
            self.observer.on_retry(attempt, delay, &error);

            match cancellation {
                Some(token) => {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            debug!(attempts = performed, "backoff sleep cancelled");
                            return Err(E::cancelled(performed));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
