//! Integration tests for resilience module
//!
//! Exercises the retry executor together with the classifier, using error
//! types shaped like the ones the HTTP client produces.

#![cfg(feature = "runtime")]

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gpucloud_common::resilience::{should_retry, RetryFailure, RetryPolicy, MAX_DELAY};
use gpucloud_common::ClassifiedError;
use tokio_util::sync::CancellationToken;

/// Error type mirroring a client error enum
#[derive(Debug)]
enum ClientError {
    Api(ClassifiedError),
    Io(std::io::Error),
    Exhausted { attempts: u32, last: Box<ClientError> },
    Cancelled,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Exhausted { attempts, last } => {
                write!(f, "failed after {attempts} attempts: {last}")
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Api(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Exhausted { last, .. } => Some(last.as_ref()),
            Self::Cancelled => None,
        }
    }
}

impl RetryFailure for ClientError {
    fn exhausted(attempts: u32, last: Self) -> Self {
        Self::Exhausted { attempts, last: Box::new(last) }
    }

    fn cancelled(_attempts: u32) -> Self {
        Self::Cancelled
    }
}

fn api(status: u16, message: &str) -> ClientError {
    ClientError::Api(ClassifiedError::new(status, message))
}

/// Validates that a server that recovers is retried until it answers.
///
/// # Test Steps
/// 1. Fail twice with 503, then succeed
/// 2. Verify the value is returned and exactly 3 calls were made
#[tokio::test(start_paused = true)]
async fn test_recovers_from_transient_server_errors() {
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy::new(3, Duration::from_millis(50));
    let mut state = Arc::clone(&calls);

    let result = policy
        .execute(&mut state, None, |calls| {
            Box::pin(async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(api(503, "service unavailable")),
                    _ => Ok(42_u32),
                }
            })
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Validates that permanent client errors are never retried.
///
/// # Test Steps
/// 1. Fail with each of 400, 401, 403, 404
/// 2. Verify one call each and that the original error comes back
#[tokio::test]
async fn test_client_errors_fail_fast() {
    let policy = RetryPolicy::new(5, Duration::from_millis(1));

    for status in [400_u16, 401, 403, 404] {
        let mut calls = 0_u32;
        let result: Result<(), ClientError> = policy
            .execute(&mut calls, None, |calls| {
                Box::pin(async move {
                    *calls += 1;
                    Err(api(status, "rejected"))
                })
            })
            .await;

        assert_eq!(calls, 1, "status {status} was retried");
        assert!(matches!(result, Err(ClientError::Api(ref e)) if e.status_code == status));
    }
}

/// Validates exhaustion wraps the final error and keeps it in the chain.
///
/// # Test Steps
/// 1. Always fail with a connection error
/// 2. Verify max_retries + 1 calls and an exhausted error holding the io error
#[tokio::test(start_paused = true)]
async fn test_exhaustion_preserves_last_error() {
    let policy = RetryPolicy::new(2, Duration::from_millis(10));
    let mut calls = 0_u32;

    let result: Result<(), ClientError> = policy
        .execute(&mut calls, None, |calls| {
            Box::pin(async move {
                *calls += 1;
                Err(ClientError::Io(std::io::Error::other("connection refused")))
            })
        })
        .await;

    assert_eq!(calls, 3);
    let err = result.unwrap_err();
    assert!(matches!(err, ClientError::Exhausted { attempts: 3, .. }));
    assert!(err.to_string().contains("connection refused"));
    assert!(err.source().is_some());
}

/// Validates that an exhausted error is itself classified from its chain, so
/// nesting one retry loop in another does not multiply attempts for 4xx.
#[test]
fn test_classifier_sees_through_wrapping() {
    let wrapped = ClientError::Exhausted { attempts: 3, last: Box::new(api(404, "gone")) };
    assert!(!should_retry(&wrapped));

    let wrapped = ClientError::Exhausted { attempts: 3, last: Box::new(api(502, "gateway")) };
    assert!(should_retry(&wrapped));
}

/// Validates that large attempt numbers stay at the delay ceiling.
#[test]
fn test_delays_never_exceed_ceiling_plus_jitter() {
    let policy = RetryPolicy::new(50, Duration::from_secs(1));
    for attempt in 1..=50 {
        assert!(policy.delay_for(attempt) <= MAX_DELAY.mul_f64(1.5));
    }
}

/// Validates that cancelling during backoff stops the loop promptly.
///
/// # Test Steps
/// 1. Fail with 500 and a 30 second initial delay
/// 2. Cancel the token shortly after the first failure
/// 3. Verify one call and a cancellation error without waiting the full delay
#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff() {
    let policy = RetryPolicy::new(3, Duration::from_secs(30));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let mut calls = 0_u32;
    let result: Result<(), ClientError> = policy
        .execute(&mut calls, Some(&token), |calls| {
            Box::pin(async move {
                *calls += 1;
                Err(api(500, "internal"))
            })
        })
        .await;

    assert_eq!(calls, 1);
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(15));
}
