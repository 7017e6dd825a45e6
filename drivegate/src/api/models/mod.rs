//! API request and response data models.
//!
//! These define the public contract with the browser client and are annotated with `utoipa` for
//! the generated API docs.
//!
//! - [`files`]: upload results, deletion results and upload parameters
//! - [`health`]: liveness response

pub mod files;
pub mod health;
