//! Service-account access tokens.
//!
//! Google service accounts authenticate with the OAuth2 JWT-bearer grant: a short-lived assertion
//! signed with the account's private key is exchanged at the key's `token_uri` for an access token.
//! [`TokenSource`] caches the access token and refreshes it shortly before it expires.

use arc_swap::ArcSwapOption;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error as ThisError;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before Google says they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, ThisError)]
pub enum TokenError {
    #[error("Failed to read service account key {path}: {source}")]
    KeyFile { path: String, source: std::io::Error },

    #[error("Invalid service account key: {0}")]
    KeyFormat(String),

    #[error("Failed to sign token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("Token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Token endpoint rejected the service account ({status}): {message}")]
    Rejected { status: reqwest::StatusCode, message: String },
}

/// The parts of a Google service account key file we use. Other fields are ignored.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, TokenError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TokenError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, TokenError> {
        let key: Self = serde_json::from_str(raw).map_err(|e| TokenError::KeyFormat(e.to_string()))?;
        if key.client_email.is_empty() {
            return Err(TokenError::KeyFormat("client_email is empty".to_string()));
        }
        Ok(key)
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Hands out bearer tokens for the Drive API.
pub struct TokenSource {
    client: reqwest::Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    scope: String,
    cached: ArcSwapOption<CachedToken>,
    // Serializes refreshes so concurrent requests don't all hit the token endpoint
    refresh: Mutex<()>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    pub fn new(client: reqwest::Client, key: ServiceAccountKey, scope: impl Into<String>) -> Result<Self, TokenError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        Ok(Self {
            client,
            key,
            signing_key,
            scope: scope.into(),
            cached: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// A valid access token, fetching a new one if the cached token is missing or about to expire
    pub async fn access_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.fresh_cached() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        // Another task may have refreshed while we waited
        if let Some(token) = self.fresh_cached() {
            return Ok(token);
        }

        let fetched = self.fetch().await?;
        let token = fetched.access_token.clone();
        self.cached.store(Some(Arc::new(fetched)));
        Ok(token)
    }

    fn fresh_cached(&self) -> Option<String> {
        self.cached
            .load()
            .as_ref()
            .filter(|cached| Instant::now() < cached.refresh_at)
            .map(|cached| cached.access_token.clone())
    }

    #[instrument(skip(self), fields(client_email = %self.key.client_email), err)]
    async fn fetch(&self) -> Result<CachedToken, TokenError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let assertion = jsonwebtoken::encode(&header, &claims, &self.signing_key)?;

        let requested_at = Instant::now();
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TokenError::Rejected { status, message });
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(REFRESH_MARGIN);
        debug!(expires_in = body.expires_in, "Obtained Drive access token");

        Ok(CachedToken {
            access_token: body.access_token,
            refresh_at: requested_at + lifetime,
        })
    }
}
