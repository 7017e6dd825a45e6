//! # drivegate: authenticated file storage on Google Drive
//!
//! `drivegate` is a small HTTP service that lets a browser client store, serve and delete files
//! in Google Drive without holding Drive credentials itself. The service owns a Google service
//! account; callers prove who they are with a Firebase Authentication ID token.
//!
//! ## Overview
//!
//! Uploaded files land below a shared folder (usually on a shared drive) in
//! `<root_folder>/<classroom id>` or `<root_folder>/uploads`. Folders are looked up and created on
//! demand, so the tree needs no setup beyond the shared folder itself. Every stored file is made
//! readable by link, and the upload response carries Drive's preview and download links.
//!
//! Files are served back through the service as a stream, with the original file name restored in
//! `Content-Disposition`. There is a public download route for embedding, and an authenticated
//! one.
//!
//! Nothing is persisted locally. Drive is the only state.
//!
//! ## Architecture
//!
//! - [`api`]: axum handlers and response models
//! - [`auth`]: bearer token verification and the `Authenticated` extractor
//! - [`drive`]: the [`drive::DriveApi`] trait, its REST implementation, folder resolution and
//!   service-account tokens
//! - [`config`]: YAML + environment configuration
//! - [`errors`]: the error type handlers return and its JSON rendering
//!
//! The Drive client and token verifier are built once in [`Application::new`] and shared through
//! [`AppState`]. Both sit behind traits, so the router can be tested against in-memory fakes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use drivegate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = drivegate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     drivegate::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod drive;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    auth::{FirebaseVerifier, IdentityVerifier},
    config::CorsOrigin,
    drive::{DRIVE_SCOPE, DriveApi, DriveClient, token::ServiceAccountKey, token::TokenSource},
    openapi::ApiDoc,
};
use anyhow::Context;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method},
    routing::{delete, get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .drive(Arc::new(drive_client))
///     .verifier(Arc::new(firebase_verifier))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub drive: Arc<dyn DriveApi>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_credentials(cors_config.allow_credentials);

    cors = if cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        cors.allow_origin(tower_http::cors::Any).allow_headers(tower_http::cors::Any)
    } else {
        let origins = cors_config
            .allowed_origins
            .iter()
            .map(|origin| origin.header_value().parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        cors.allow_origin(origins).allow_headers(AllowHeaders::mirror_request())
    };

    let exposed = cors_config
        .exposed_headers
        .iter()
        .map(|name| name.parse::<HeaderName>())
        .collect::<Result<Vec<_>, _>>()?;
    cors = cors.expose_headers(exposed);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: file routes, health, API docs, optional metrics, CORS and
/// request tracing.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_limit = usize::try_from(state.config.upload.max_file_size).unwrap_or(usize::MAX);

    let mut router = Router::new()
        .route("/health", get(api::handlers::health::health))
        .route(
            "/upload",
            post(api::handlers::files::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/public/download/{file_id}", get(api::handlers::files::public_download_file))
        .route("/download/{file_id}", get(api::handlers::files::download_file))
        .route("/delete/{file_id}", delete(api::handlers::files::delete_file))
        .with_state(state.clone())
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    if state.config.enable_api_docs {
        router = router.merge(Scalar::with_url("/docs", ApiDoc::openapi()));
    }

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Outbound HTTP client shared by the Drive client, the token source and the key fetcher
fn build_http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.http.connect_timeout)
        .read_timeout(config.http.read_timeout)
        .user_agent(concat!("drivegate/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Load credentials and build the clients. Fails if the service account key is unusable.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting drivegate with configuration: {:#?}", config);

        let http = build_http_client(&config)?;

        let key = ServiceAccountKey::from_file(&config.drive.service_account_key)?;
        info!(client_email = %key.client_email, "Loaded service account key");
        let tokens = TokenSource::new(http.clone(), key, DRIVE_SCOPE)?;
        let drive = DriveClient::new(
            http.clone(),
            &config.drive.api_base_url,
            Arc::new(tokens),
            config.drive.upload_chunk_size,
        );
        let verifier = FirebaseVerifier::new(http, &config.firebase);

        if config.shared_folder_id().is_none() {
            tracing::warn!("drive.shared_folder_id is not set; uploads will fail until it is configured");
        }

        let state = AppState::builder()
            .config(config.clone())
            .drive(Arc::new(drive))
            .verifier(Arc::new(verifier))
            .build();
        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Serve until `shutdown` resolves, then flush telemetry
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "drivegate listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
