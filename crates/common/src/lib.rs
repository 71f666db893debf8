//! Shared building blocks for the GPU cloud SDK crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: the API error envelope and retryability classification
//! - `runtime`: the async retry executor with jittered exponential backoff

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Classification lives in the foundation tier; the retry executor inside
// `resilience` additionally requires `runtime`.
#[cfg(feature = "foundation")]
pub mod resilience;

#[cfg(feature = "foundation")]
pub use error::ClassifiedError;
