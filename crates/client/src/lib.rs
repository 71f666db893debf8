//! # GPU Cloud Client
//!
//! Transport core of the GPU cloud REST SDK.
//!
//! This crate contains:
//! - OAuth2 credential store with proactive refresh (`auth`)
//! - Request/response middleware pipeline with snapshot isolation
//!   (`middleware`)
//! - The request dispatcher and typed HTTP helpers (`client`)
//! - Configuration loading from environment and files (`config`)
//!
//! Retry classification and backoff live in `gpucloud-common`.
//!
//! ```no_run
//! use gpucloud_client::{ClientConfig, GpuCloudClient};
//!
//! # async fn run() -> Result<(), gpucloud_client::ApiError> {
//! let config = ClientConfig::new("https://api.example.com/v1")
//!     .with_client_credentials("client-id", "client-secret");
//! let client = GpuCloudClient::new(config)?;
//! let instances: serde_json::Value = client.get("/instances").await?;
//! # let _ = instances;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod middleware;

// Re-export commonly used items
pub use auth::{Credential, CredentialError, CredentialStore};
pub use client::{ApiResponse, CallOptions, GpuCloudClient, GpuCloudClientBuilder};
pub use config::ClientConfig;
pub use errors::ApiError;
pub use gpucloud_common::ClassifiedError;
