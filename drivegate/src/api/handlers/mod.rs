//! HTTP request handlers.
//!
//! - [`files`]: upload, download (public and authenticated) and deletion of Drive files
//! - [`health`]: liveness check
//!
//! Uploads, authenticated downloads and deletions take the [`crate::auth::current_user::Authenticated`]
//! extractor. Errors are returned as [`crate::errors::Error`], which renders a JSON `detail` body.

pub mod files;
pub mod health;
