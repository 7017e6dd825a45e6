//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # Routes
//!
//! - `GET /health`: liveness
//! - `POST /upload`: store a file under the shared folder (authenticated)
//! - `GET /public/download/{file_id}`: stream a file to anyone
//! - `GET /download/{file_id}`: stream a file (authenticated)
//! - `DELETE /delete/{file_id}`: remove a file (authenticated)
//!
//! All endpoints carry `utoipa` annotations; the rendered docs are served at `/docs`.

pub mod handlers;
pub mod models;
