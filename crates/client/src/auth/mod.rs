//! OAuth2 credential management
//!
//! [`CredentialStore`] fetches, caches and refreshes the bearer token used by
//! the authentication middleware.

pub mod store;
pub mod types;

pub use store::{CredentialError, CredentialStore};
pub use types::{Credential, GrantType, TokenRequest, TokenResponse, EXPIRY_SKEW_SECONDS};
