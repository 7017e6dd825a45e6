//! Caller authentication.
//!
//! Callers present a Firebase Authentication ID token in `Authorization: Bearer <token>`. The token
//! is checked locally against Google's published signing keys; no session is created and nothing
//! about the caller is stored. A valid token is the only authorization requirement.
//!
//! # Modules
//!
//! - [`current_user`]: the [`current_user::Authenticated`] extractor used by mutating handlers
//! - [`firebase`]: ID token verification against the project's signing keys
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use drivegate::auth::current_user::Authenticated;
//!
//! async fn protected_handler(Authenticated(identity): Authenticated) -> String {
//!     format!("Hello, {}!", identity.uid)
//! }
//! ```

pub mod current_user;
pub mod firebase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub use firebase::FirebaseVerifier;

/// The caller behind a verified token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// Firebase user id (`sub` claim)
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, ThisError)]
pub enum VerifyError {
    /// The token itself is unacceptable (expired, forged, wrong project...)
    #[error("{0}")]
    Rejected(String),

    /// Signing keys could not be obtained, so no token can be checked
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

/// Checks bearer tokens with the identity provider.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, VerifyError>;
}
