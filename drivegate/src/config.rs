//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `DRIVEGATE_CONFIG`
//! environment variable. A missing file is not an error; every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `DRIVEGATE_` override YAML values
//! 3. **Deployment variables** - The unprefixed variables used by existing deployments:
//!    `FIREBASE_PROJECT_ID`, `GOOGLE_DRIVE_SERVICE_ACCOUNT_KEY`, `GOOGLE_DRIVE_SHARED_FOLDER_ID`
//!    and `PORT`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `DRIVEGATE_DRIVE__UPLOAD_CHUNK_SIZE=16777216` sets the `drive.upload_chunk_size` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use drivegate::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}", config.bind_address());
//! # Ok(())
//! # }
//! ```
//!
//! ## Shared folder
//!
//! `drive.shared_folder_id` is deliberately optional at startup. Uploads fail with a 500 while it
//! is unset; downloads and deletions keep working.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Resumable uploads must be sent in multiples of this many bytes (except the final chunk).
pub const UPLOAD_CHUNK_GRANULARITY: usize = 256 * 1024;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "DRIVEGATE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Identity provider settings
    pub firebase: FirebaseConfig,
    /// Storage provider settings
    pub drive: DriveConfig,
    /// Upload handling
    pub upload: UploadConfig,
    /// Outbound HTTP client settings shared by the Drive and Firebase clients
    pub http: HttpClientConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Serve interactive API documentation at `/docs`
    pub enable_api_docs: bool,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Firebase Authentication settings used to verify ID tokens.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirebaseConfig {
    /// Firebase project whose ID tokens are accepted (`aud` claim)
    pub project_id: String,
    /// JWK set holding the token signing keys
    pub jwks_url: Url,
    /// Allowed clock skew when checking `exp`, `iat` and `auth_time`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

/// Google Drive settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    /// Path to the service account key (JSON) used to call the Drive API
    pub service_account_key: PathBuf,
    /// Folder (usually on a shared drive) under which uploads are placed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_folder_id: Option<String>,
    /// Base URL of the Google APIs host
    pub api_base_url: Url,
    /// Bytes sent per request during resumable uploads
    pub upload_chunk_size: usize,
}

/// Upload handling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Top-level folder created under the shared folder
    pub root_folder: String,
    /// Folder used when the upload carries no classroom id
    pub default_folder: String,
    /// Maximum request body size accepted by `/upload`, in bytes
    pub max_file_size: u64,
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpClientConfig {
    /// Timeout for establishing connections
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Longest wait for the next chunk of a response. Resets on every read, so streamed downloads
    /// of any length are allowed as long as data keeps arriving.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
    /// Headers exposed to the browser (in addition to CORS-safelisted headers)
    pub exposed_headers: Vec<String>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl CorsOrigin {
    /// Origin as sent by browsers: scheme://host[:port] with no trailing slash
    pub fn header_value(&self) -> String {
        match self {
            CorsOrigin::Wildcard => "*".to_string(),
            CorsOrigin::Url(url) => url.origin().ascii_serialization(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            firebase: FirebaseConfig::default(),
            drive: DriveConfig::default(),
            upload: UploadConfig::default(),
            http: HttpClientConfig::default(),
            cors: CorsConfig::default(),
            enable_api_docs: true,
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            project_id: "personal-video-platform".to_string(),
            jwks_url: Url::parse("https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com")
                .expect("static JWKS URL is valid"),
            clock_skew: Duration::from_secs(5),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            service_account_key: PathBuf::from("/app/service-account-key.json"),
            shared_folder_id: None,
            api_base_url: Url::parse("https://www.googleapis.com/").expect("static API URL is valid"),
            upload_chunk_size: 32 * UPLOAD_CHUNK_GRANULARITY, // 8 MiB
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            root_folder: "pvp".to_string(),
            default_folder: "uploads".to_string(),
            max_file_size: 1024 * 1024 * 1024, // 1 GiB
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        let origins = [
            "http://localhost:5173",
            "http://localhost:3000",
            "https://personal-video-platform.web.app",
            "https://personal-video-platform.firebaseapp.com",
        ];
        Self {
            allowed_origins: origins
                .iter()
                .map(|o| CorsOrigin::Url(Url::parse(o).expect("static origin is valid")))
                .collect(),
            allow_credentials: true,
            max_age: Some(3600), // Cache preflight for 1 hour
            exposed_headers: vec!["content-disposition".to_string(), "content-type".to_string()],
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.firebase.project_id.trim().is_empty() {
            anyhow::bail!("Config validation: firebase.project_id cannot be empty (set FIREBASE_PROJECT_ID)");
        }

        let chunk = self.drive.upload_chunk_size;
        if chunk == 0 || chunk % UPLOAD_CHUNK_GRANULARITY != 0 {
            anyhow::bail!("Config validation: drive.upload_chunk_size ({chunk}) must be a positive multiple of {UPLOAD_CHUNK_GRANULARITY} bytes");
        }

        if self.upload.root_folder.trim_matches('/').is_empty() {
            anyhow::bail!("Config validation: upload.root_folder cannot be empty");
        }

        if self.upload.default_folder.trim_matches('/').is_empty() {
            anyhow::bail!("Config validation: upload.default_folder cannot be empty");
        }

        if self.cors.allowed_origins.is_empty() {
            anyhow::bail!("Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.");
        }

        // Browsers reject credentialed responses with a wildcard origin
        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            anyhow::bail!("Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins.");
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Prefixed environment variables; DRIVEGATE_CONFIG names the file and is not a field
            .merge(
                Env::prefixed("DRIVEGATE_")
                    .filter(|key| !key.as_str().eq_ignore_ascii_case("config"))
                    .split("__"),
            )
            // Variables used by existing deployments
            .merge(Env::raw().only(&["FIREBASE_PROJECT_ID"]).map(|_| "firebase.project_id".into()))
            .merge(
                Env::raw()
                    .only(&["GOOGLE_DRIVE_SERVICE_ACCOUNT_KEY"])
                    .map(|_| "drive.service_account_key".into()),
            )
            .merge(
                Env::raw()
                    .only(&["GOOGLE_DRIVE_SHARED_FOLDER_ID"])
                    .map(|_| "drive.shared_folder_id".into()),
            )
            .merge(Env::raw().only(&["PORT"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The shared upload root, if configured. Empty strings count as unset.
    pub fn shared_folder_id(&self) -> Option<&str> {
        self.drive.shared_folder_id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}
