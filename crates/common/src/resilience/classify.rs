//! Retryability classification
//!
//! Errors reach the retry policy in three shapes:
//! 1. a [`ClassifiedError`] carrying the HTTP status (possibly wrapped inside
//!    other errors, so the whole `source()` chain is searched),
//! 2. a JSON decode failure, which is never transient,
//! 3. anything else, classified by lower-cased message substrings.
//!
//! Unknown errors are not retried.

use std::error::Error;

use crate::error::ClassifiedError;

/// Message fragments that mark an error as permanent. Checked first.
const NON_RETRYABLE_PATTERNS: [&str; 6] =
    ["authentication", "unauthorized", "forbidden", "not found", "invalid", "bad request"];

/// Message fragments that mark an error as transient.
const RETRYABLE_PATTERNS: [&str; 5] =
    ["timeout", "connection", "temporary", "rate limit", "too many requests"];

/// Decide retryability from an HTTP status code.
///
/// 500, 502, 503, 504, 429 and 408 are retryable; 400, 401, 403 and 404 are
/// not; any other 5xx is retryable and everything else is not.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    match status {
        408 | 429 | 500 | 502 | 503 | 504 => true,
        400 | 401 | 403 | 404 => false,
        500..=599 => true,
        _ => false,
    }
}

/// Classify free text.
///
/// Returns `Some(false)` when a permanent pattern matches, `Some(true)` when a
/// transient pattern matches and `None` when the message is unrecognised.
#[must_use]
pub fn classify_message(message: &str) -> Option<bool> {
    let lower = message.to_lowercase();
    if NON_RETRYABLE_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return Some(false);
    }
    if RETRYABLE_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return Some(true);
    }
    None
}

/// Decide whether `error` is worth retrying.
///
/// The first [`ClassifiedError`] found in the error's source chain decides by
/// status code. A `serde_json::Error` anywhere in the chain is permanent.
/// Otherwise the concatenated messages of the whole chain are matched against
/// the known patterns.
#[must_use]
pub fn should_retry(error: &(dyn Error + 'static)) -> bool {
    let mut current: Option<&(dyn Error + 'static)> = Some(error);
    let mut text = String::new();

    while let Some(err) = current {
        if let Some(api) = err.downcast_ref::<ClassifiedError>() {
            return is_retryable_status(api.status_code);
        }
        if err.is::<serde_json::Error>() {
            return false;
        }
        if !text.is_empty() {
            text.push_str(": ");
        }
        text.push_str(&err.to_string());
        current = err.source();
    }

    classify_message(&text).unwrap_or(false)
}
